use keel_graph::{AppGraph, ValidationContext};

use super::{Stage, StageContext, StageError};

/// True if `target` already has a failure under a key starting with `prefix`.
fn already_failed(validation: &ValidationContext, target: &str, prefix: &str) -> bool {
    validation
        .failures()
        .iter()
        .any(|d| d.target == target && d.key.starts_with(prefix))
}

/// Final check that resolution left nothing open.
///
/// A module or application still without an identity aborts the run; earlier stages
/// guarantee one, so this is a broken pipeline rather than a rule violation.
///
/// Anything still unresolved that no earlier stage explained becomes a failure here, so a
/// graph that passes has a deployment id and container for every component and a binding
/// for every reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidateResolution;

impl Stage for ValidateResolution {
    fn name(&self) -> &'static str {
        "validate-resolution"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        if graph.identity.is_none() {
            return Err(StageError::MissingIdentity {
                module: graph.display_name(),
            });
        }
        if let Some(module) = graph.modules_iter().map(|(_, m)| m).find(|m| m.identity.is_none()) {
            return Err(StageError::MissingIdentity {
                module: module.display_name(),
            });
        }

        for module in graph.modules.iter_mut().flatten() {
            let module_name = module.display_name();
            let mut open: Vec<(String, &'static str, String)> = Vec::new();

            if !already_failed(&module.validation, &module_name, "link.") {
                for reference in module.refs.iter().filter(|r| r.binding.is_none()) {
                    open.push((
                        module_name.clone(),
                        "link.unresolved",
                        format!("reference `{}` has no binding", reference.name),
                    ));
                }
            }

            for component in module.components.values() {
                let name = &component.name;
                if component.deployment_id.is_none()
                    && !already_failed(&module.validation, name, "deployment.")
                {
                    open.push((
                        name.clone(),
                        "deployment.missing-id",
                        "no deployment id".to_string(),
                    ));
                }
                let linked = already_failed(&module.validation, name, "link.");
                if component.container_id.is_none() && !linked {
                    open.push((name.clone(), "container.missing", "no container".to_string()));
                }
                if !linked {
                    for reference in component.refs.iter().filter(|r| r.binding.is_none()) {
                        open.push((
                            name.clone(),
                            "link.unresolved",
                            format!("reference `{}` has no binding", reference.name),
                        ));
                    }
                }
                if !already_failed(&module.validation, name, "unit.") {
                    for reference in component.unit_refs.iter().filter(|r| r.resolved.is_none()) {
                        open.push((
                            name.clone(),
                            "unit.unresolved",
                            format!("unit reference `{}` is not linked", reference.name),
                        ));
                    }
                }
            }

            for (target, key, detail) in open {
                module.validation.fail(target, key, detail);
            }
        }

        let mut open_units = Vec::new();
        for unit in &graph.shared_units {
            for reference in unit.data_sources().filter(|r| r.binding.is_none()) {
                open_units.push((
                    unit.owner,
                    unit.name.clone(),
                    format!("data source `{}` has no binding", reference.name),
                ));
            }
        }
        for (owner, target, detail) in open_units {
            let validation = graph.unit_validation_mut(owner);
            if !already_failed(validation, &target, "link.") {
                validation.fail(target, "link.unresolved", detail);
            }
        }

        let diagnostics = graph.diagnostics();
        tracing::info!(
            application = %graph.display_name(),
            errors = diagnostics.errors.len(),
            failures = diagnostics.failures.len(),
            warnings = diagnostics.warnings.len(),
            "resolution finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_graph::{
        Component, ComponentType, DATA_SOURCE_TYPE, Identity, ModuleKind, Provenance,
        ResolvedBinding, ResourceRef, SharedUnit, UnitRef,
    };

    use super::*;
    use crate::passes::fixture::Fixture;

    #[test]
    fn unexplained_gaps_become_failures() {
        let mut graph = AppGraph::new();
        graph.identity = Some(Identity::from("shop"));
        let module = graph.add_module(ModuleKind::Container);
        module.identity = Some(Identity::from("orders"));

        let mut done = Component::new("Done", "a.Done", ComponentType::Stateless);
        done.deployment_id = Some("Done".to_string());
        done.container_id = Some("c".to_string());
        let mut bound = ResourceRef::new("jdbc/a");
        bound.binding = Some(ResolvedBinding {
            target: "a".to_string(),
            provenance: Provenance::Explicit,
        });
        done.refs.push(bound);
        module.add_component(done).unwrap();

        let mut open = Component::new("Open", "a.Open", ComponentType::Stateless);
        open.refs.push(ResourceRef::new("jdbc/b"));
        open.unit_refs.push(UnitRef::new("em"));
        module.add_component(open).unwrap();

        let mut explained = Component::new("Explained", "a.Explained", ComponentType::Stateless);
        explained.deployment_id = Some("Explained".to_string());
        explained.refs.push(ResourceRef::new("jdbc/c"));
        module.add_component(explained).unwrap();
        module
            .validation
            .fail("Explained", "link.unresolved", "no resource");

        ValidateResolution.apply(&mut graph, &Fixture::new().cx()).unwrap();

        let failures = graph.diagnostics().failures;
        let mut found: Vec<(&str, &str)> = failures
            .iter()
            .map(|d| (d.target.as_str(), d.key.as_str()))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("Explained", "link.unresolved"),
                ("Open", "container.missing"),
                ("Open", "deployment.missing-id"),
                ("Open", "link.unresolved"),
                ("Open", "unit.unresolved"),
            ]
        );
        assert!(graph.diagnostics().errors.is_empty());
    }

    #[test]
    fn missing_module_identity_aborts() {
        let mut graph = AppGraph::new();
        graph.identity = Some(Identity::from("shop"));
        graph.add_module(ModuleKind::Container).explicit_name = Some("orders".to_string());

        let err = ValidateResolution
            .apply(&mut graph, &Fixture::new().cx())
            .unwrap_err();

        assert!(matches!(err, StageError::MissingIdentity { ref module } if module == "orders"));
    }

    #[test]
    fn unbound_unit_data_sources_fail_once() {
        let mut graph = AppGraph::new();
        graph.identity = Some(Identity::from("shop"));
        let root = url::Url::parse("file:///app/lib/").unwrap();
        let mut archive = SharedUnit::new("archive", root.clone());
        archive.data_source = Some(ResourceRef::new("jdbc/archive").of_type(DATA_SOURCE_TYPE));
        let mut reports = SharedUnit::new("reports", root);
        reports.data_source = Some(ResourceRef::new("jdbc/reports").of_type(DATA_SOURCE_TYPE));
        graph.shared_units = vec![archive, reports];
        graph
            .validation
            .fail("reports", "link.ambiguous", "two candidates");

        ValidateResolution.apply(&mut graph, &Fixture::new().cx()).unwrap();

        let failures = graph.diagnostics().failures;
        let found: Vec<(&str, &str)> = failures
            .iter()
            .map(|d| (d.target.as_str(), d.key.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![("reports", "link.ambiguous"), ("archive", "link.unresolved")]
        );
    }
}
