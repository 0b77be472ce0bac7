use std::collections::HashSet;

use keel_graph::{AppGraph, Identity, ModuleId};

use super::{Stage, StageContext, StageError};
use crate::identity;

/// Gives every module and the application a unique identity.
///
/// Identities already present are kept; two modules arriving with the same one abort the
/// run. A computed identity that collides with an earlier module's is replaced by the
/// synthesized fallback. Generated client views are named after their source module, so
/// they are handled after everything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssignIdentities;

impl Stage for AssignIdentities {
    fn name(&self) -> &'static str {
        "assign-identities"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let mut taken: HashSet<Identity> = HashSet::new();
        for (id, module) in graph.modules_iter() {
            let Some(identity) = module.identity.clone() else {
                continue;
            };
            if !taken.insert(identity.clone()) {
                tracing::error!(%identity, module = %id, "duplicate module identity");
                return Err(StageError::DuplicateIdentity {
                    module: id.to_string(),
                    identity: identity.to_string(),
                });
            }
        }

        let mut pending: Vec<(bool, ModuleId)> = graph
            .modules_iter()
            .filter(|(_, m)| m.identity.is_none())
            .map(|(id, m)| (m.generated, id))
            .collect();
        pending.sort();

        for (_, id) in pending {
            let source_identity = graph
                .module(id)
                .client
                .as_ref()
                .filter(|_| graph.module(id).explicit_name.is_none())
                .and_then(|view| graph.get_module(view.source))
                .and_then(|source| source.identity.clone());

            let module = graph.module_mut(id);
            let wanted = match source_identity {
                Some(source) => identity::client_identity(&source),
                None => identity::candidate(module)
                    .map(Identity::from)
                    .unwrap_or_else(|| identity::fallback(module.kind, id).into()),
            };
            let assigned = if taken.contains(&wanted) {
                let mut fallback = Identity::from(identity::fallback(module.kind, id));
                let mut attempt = 1;
                while taken.contains(&fallback) {
                    fallback = format!("{}-{attempt}", identity::fallback(module.kind, id)).into();
                    attempt += 1;
                }
                tracing::warn!(%wanted, assigned = %fallback, "module identity collision");
                module.validation.warn(
                    fallback.to_string(),
                    "identity.collision",
                    format!("{wanted} is already taken; using {fallback}"),
                );
                fallback
            } else {
                wanted
            };
            taken.insert(assigned.clone());
            module.identity = Some(assigned);
        }

        let application = identity::assign_application(graph);
        tracing::debug!(%application, "application identity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_graph::{ClientView, ModuleKind, Severity};
    use url::Url;

    use super::*;
    use crate::passes::fixture::Fixture;

    fn module_at(graph: &mut AppGraph, location: &str) -> ModuleId {
        let module = graph.add_module(ModuleKind::Container);
        module.location = Some(Url::parse(location).unwrap());
        module.id
    }

    #[test]
    fn collisions_fall_back_for_the_later_module() {
        let mut graph = AppGraph::new();
        graph.packaged = true;
        let first = module_at(&mut graph, "file:///a/orders/target/classes");
        let second = module_at(&mut graph, "file:///b/orders.jar");

        AssignIdentities.apply(&mut graph, &Fixture::new().cx()).unwrap();

        assert_eq!(graph.module(first).identity.as_ref().unwrap().as_str(), "orders");
        let renamed = graph.module(second).identity.clone().unwrap();
        assert_eq!(renamed.as_str(), identity::fallback(ModuleKind::Container, second));
        let warnings: Vec<_> = graph.diagnostics().with_key("identity.collision").cloned().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert_eq!(graph.identity.as_ref().unwrap().as_str(), "application");
    }

    #[test]
    fn client_views_follow_their_source() {
        let mut graph = AppGraph::new();
        let source = module_at(&mut graph, "file:///app/orders.jar");
        let view = graph.add_module(ModuleKind::Client);
        view.generated = true;
        view.client = Some(ClientView::new(source));
        let view = view.id;

        AssignIdentities.apply(&mut graph, &Fixture::new().cx()).unwrap();

        assert_eq!(graph.module(view).identity.as_ref().unwrap().as_str(), "orders.client");
        // Standalone deployment: the only real module names the application.
        assert_eq!(graph.identity.as_ref().unwrap().as_str(), "orders");
    }

    #[test]
    fn preset_identities_are_kept() {
        let mut graph = AppGraph::new();
        let web = graph.add_module(ModuleKind::Web);
        web.identity = Some(Identity::from("shop"));
        let web = web.id;
        let other = module_at(&mut graph, "file:///app/shop.war");

        AssignIdentities.apply(&mut graph, &Fixture::new().cx()).unwrap();
        AssignIdentities.apply(&mut graph, &Fixture::new().cx()).unwrap();

        assert_eq!(graph.module(web).identity.as_ref().unwrap().as_str(), "shop");
        assert_eq!(
            graph.module(other).identity.as_ref().unwrap().as_str(),
            identity::fallback(ModuleKind::Container, other)
        );
    }

    #[test]
    fn duplicate_preset_identities_abort_the_run() {
        let mut graph = AppGraph::new();
        for _ in 0..2 {
            graph.add_module(ModuleKind::Container).identity = Some(Identity::from("orders"));
        }

        let err = crate::passes::Pipeline::standard()
            .run(graph, &Fixture::new().cx())
            .unwrap_err();

        let crate::DeployError::Stage { stage, module, source } = &err else {
            panic!("expected a stage error, got {err:?}");
        };
        assert_eq!(*stage, "assign-identities");
        assert_eq!(module.as_deref(), Some("module#1"));
        assert!(matches!(
            source,
            StageError::DuplicateIdentity { identity, .. } if identity == "orders"
        ));
    }
}
