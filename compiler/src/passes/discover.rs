use std::collections::BTreeSet;

use keel_graph::{AppGraph, ClassIndex, Component, ComponentType, Module, ResourceRef, markers};

use super::{Stage, StageContext, StageError};

/// Declares components found by scanning and computes the surface of client views.
///
/// Components declared by a descriptor win over scanned ones with the same name or class.
/// Vendor deployment settings are applied afterwards, to both kinds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscoverComponents;

impl Stage for DiscoverComponents {
    fn name(&self) -> &'static str {
        "discover-components"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        for id in graph.module_ids() {
            let generated = graph.module(id).generated;
            let scanned = graph.scan_for(id).map(|index| {
                if generated {
                    let (remote, main) = client_surface(index);
                    Discovered::Client(remote, main)
                } else {
                    Discovered::Components(scanned_components(index))
                }
            });

            let module = graph.module_mut(id);
            match scanned {
                Some(Discovered::Components(components)) => declare(module, components),
                Some(Discovered::Client(remote, main)) => {
                    if let Some(view) = module.client.as_mut() {
                        view.remote_interfaces = remote;
                        view.main_class = module
                            .descriptors
                            .client
                            .as_ref()
                            .and_then(|client| client.main_class.clone())
                            .or(main);
                    }
                }
                None => {}
            }
            apply_deployments(module);
        }
        Ok(())
    }
}

enum Discovered {
    Components(Vec<Component>),
    Client(BTreeSet<String>, Option<String>),
}

fn scanned_components(index: &ClassIndex) -> Vec<Component> {
    let mut out = Vec::new();
    for marker in markers::COMPONENT_MARKERS {
        let Some(ty) = ComponentType::from_marker(marker) else {
            continue;
        };
        for class in index.annotated_with(marker).filter(|c| !c.is_interface) {
            let mut component = Component::new(class.simple_name(), &class.name, ty);
            if ty == ComponentType::MessageDriven {
                component.listener_interface = class.interfaces.first().cloned();
            }
            out.push(component);
        }
    }
    out
}

/// Remote interfaces and entry point visible through a client view.
fn client_surface(index: &ClassIndex) -> (BTreeSet<String>, Option<String>) {
    let mut remote = BTreeSet::new();
    for class in index.annotated_with(markers::REMOTE) {
        if class.is_interface {
            remote.insert(class.name.clone());
            continue;
        }
        let is_component = markers::COMPONENT_MARKERS
            .iter()
            .any(|marker| class.annotations.contains(*marker));
        if is_component {
            remote.extend(class.interfaces.iter().cloned());
        }
    }
    let main = index
        .classes()
        .find(|class| class.has_main)
        .map(|class| class.name.clone());
    (remote, main)
}

fn declare(module: &mut Module, components: Vec<Component>) {
    for component in components {
        let declared = module
            .components
            .values()
            .any(|existing| existing.class_name == component.class_name);
        if declared {
            continue;
        }
        let name = component.name.clone();
        match module.add_component(component) {
            Ok(()) => {
                tracing::debug!(module = %module.display_name(), component = %name, "discovered component");
            }
            Err(clash) => {
                let target = module.display_name();
                module.validation.warn(
                    target,
                    "component.name-clash",
                    format!(
                        "scanned class {} is named like an existing component and was ignored",
                        clash.class_name
                    ),
                );
            }
        }
    }
}

fn apply_deployments(module: &mut Module) {
    let deployments = std::mem::take(&mut module.descriptors.deployments);
    for (name, settings) in &deployments {
        let Some(component) = module.components.get_mut(name) else {
            let target = module.display_name();
            module.validation.warn(
                target,
                "descriptor.unknown-component",
                format!("vendor settings name component `{name}`, which does not exist"),
            );
            continue;
        };
        if settings.deployment_id.is_some() {
            component.deployment_id.clone_from(&settings.deployment_id);
        }
        if settings.container_id.is_some() {
            component.container_id.clone_from(&settings.container_id);
        }
        for (reference, target) in &settings.resource_links {
            match component.refs.iter_mut().find(|r| &r.name == reference) {
                Some(existing) => existing.explicit_target = Some(target.clone()),
                None => component
                    .refs
                    .push(ResourceRef::new(reference.as_str()).targeting(target.as_str())),
            }
        }
    }
    module.descriptors.deployments = deployments;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keel_graph::{
        ClassDescriptor, ClientDescriptor, ClientView, DeploymentOverrides, ModuleKind, ScanSlot,
    };

    use super::*;
    use crate::passes::fixture::Fixture;

    fn index(classes: Vec<ClassDescriptor>) -> ScanSlot {
        ScanSlot::Owned(Arc::new(ClassIndex::from_classes(classes)))
    }

    #[test]
    fn scanned_components_merge_with_declared_ones() {
        let mut graph = AppGraph::new();
        let module = graph.add_module(ModuleKind::Container);
        module.scan = index(vec![
            ClassDescriptor::new("a.OrdersBean").annotated(markers::STATELESS),
            ClassDescriptor::new("a.Billing").annotated(markers::SINGLETON),
            ClassDescriptor::new("a.Listener")
                .annotated(markers::MESSAGE_DRIVEN)
                .implementing("MessageListener"),
        ]);
        module
            .add_component(Component::new("Orders", "a.OrdersBean", ComponentType::Stateful))
            .unwrap();
        module.descriptors.deployments.insert(
            "Billing".to_string(),
            DeploymentOverrides {
                deployment_id: Some("BillingV2".to_string()),
                resource_links: [("jdbc/billing".to_string(), "billingDb".to_string())].into(),
                ..DeploymentOverrides::default()
            },
        );
        let id = module.id;

        DiscoverComponents.apply(&mut graph, &Fixture::new().cx()).unwrap();

        let module = graph.module(id);
        let names: Vec<&str> = module.components.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Billing", "Listener", "Orders"]);
        assert_eq!(module.components["Orders"].component_type, ComponentType::Stateful);
        assert_eq!(
            module.components["Listener"].listener_interface.as_deref(),
            Some("MessageListener")
        );
        let billing = &module.components["Billing"];
        assert_eq!(billing.deployment_id.as_deref(), Some("BillingV2"));
        assert_eq!(billing.refs[0].explicit_target.as_deref(), Some("billingDb"));
    }

    #[test]
    fn client_view_surface_comes_from_the_source_scan() {
        let mut graph = AppGraph::new();
        let source = graph.add_module(ModuleKind::Container);
        source.scan = index(vec![
            ClassDescriptor::new("a.OrdersApi").interface().annotated(markers::REMOTE),
            ClassDescriptor::new("a.BillingBean")
                .annotated(markers::STATELESS)
                .annotated(markers::REMOTE)
                .implementing("a.BillingApi"),
            ClassDescriptor::new("a.Zeta").with_main(),
            ClassDescriptor::new("a.Alpha").with_main(),
        ]);
        let source = source.id;
        let add_view = |graph: &mut AppGraph| {
            let view = graph.add_module(ModuleKind::Client);
            view.generated = true;
            view.scan = ScanSlot::Shared(source);
            view.client = Some(ClientView::new(source));
            view.id
        };
        let plain = add_view(&mut graph);
        let described = add_view(&mut graph);
        graph.module_mut(described).descriptors.client = Some(ClientDescriptor {
            main_class: Some("a.Zeta".to_string()),
        });

        DiscoverComponents.apply(&mut graph, &Fixture::new().cx()).unwrap();

        let view = graph.module(plain).client.as_ref().unwrap();
        assert_eq!(
            view.remote_interfaces.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a.BillingApi", "a.OrdersApi"]
        );
        assert_eq!(view.main_class.as_deref(), Some("a.Alpha"));
        assert!(graph.module(plain).components.is_empty());
        assert_eq!(
            graph.module(described).client.as_ref().unwrap().main_class.as_deref(),
            Some("a.Zeta")
        );
    }
}
