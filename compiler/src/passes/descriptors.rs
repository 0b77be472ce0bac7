use keel_graph::{
    AppGraph, Component, DATA_SOURCE_TYPE, DeclaredContainer, DeclaredResource,
    DeploymentOverrides, Module, ModuleId, ResourceRef, SharedUnit, UnitRef,
};
use keel_scanner::{
    ComponentDecl, Descriptor, DescriptorName, ModuleDescriptor, PersistenceDescriptor,
    ReferenceDecl, VendorDescriptor,
};
use url::Url;

use super::{Stage, StageContext, StageError};

/// Reads every module's descriptors and folds them into the graph.
///
/// Inline descriptors on the graph take precedence over the descriptor source. A
/// descriptor that cannot be read or parsed aborts the run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadDescriptors;

impl Stage for ReadDescriptors {
    fn name(&self) -> &'static str {
        "read-descriptors"
    }

    fn apply(&self, graph: &mut AppGraph, cx: &StageContext<'_>) -> Result<(), StageError> {
        let mut found = Vec::new();
        for (id, module) in graph.modules_iter() {
            let names: &[DescriptorName] = if module.generated {
                &[DescriptorName::Client]
            } else {
                &DescriptorName::MODULE_DESCRIPTORS
            };
            for &name in names {
                if let Some(descriptor) = read(graph, id, module, name, cx)? {
                    found.push((id, descriptor));
                }
            }
        }

        for (id, descriptor) in found {
            match descriptor {
                Descriptor::Module(decl) => apply_module(graph.module_mut(id), decl),
                Descriptor::Vendor(decl) => apply_vendor(graph, id, decl),
                Descriptor::Client(decl) => graph.module_mut(id).descriptors.client = Some(decl),
                Descriptor::Persistence(decl) => apply_persistence(graph, id, decl),
                Descriptor::Properties(properties) => {
                    let module = graph.module_mut(id);
                    for (key, value) in properties {
                        module.properties.entry(key).or_insert(value);
                    }
                }
            }
        }

        if let Some(location) = graph.location.clone() {
            let app = graph.display_name();
            let properties = cx
                .descriptors
                .parse(&location, DescriptorName::ApplicationProperties)
                .map_err(|source| StageError::Descriptor {
                    module: app,
                    source,
                })?;
            if let Some(Descriptor::Properties(properties)) = properties {
                for (key, value) in properties {
                    graph.properties.entry(key).or_insert(value);
                }
            }
        }
        Ok(())
    }
}

/// One descriptor of `module`, inline content first. Generated client views share the
/// inline descriptors of their source module.
pub(super) fn read(
    graph: &AppGraph,
    id: ModuleId,
    module: &Module,
    name: DescriptorName,
    cx: &StageContext<'_>,
) -> Result<Option<Descriptor>, StageError> {
    let failed = |source| StageError::Descriptor {
        module: module.display_name(),
        source,
    };
    let owner = match &module.client {
        Some(view) if module.generated => view.source,
        _ => id,
    };
    let inline = graph.raw_descriptors.iter().find(|raw| {
        raw.module == owner && DescriptorName::from_file_name(&raw.file_name) == Some(name)
    });
    if let Some(raw) = inline {
        let origin = format!("{} (inline)", module.display_name());
        return name.parse(&origin, &raw.content).map(Some).map_err(failed);
    }
    match &module.location {
        Some(location) => cx.descriptors.parse(location, name).map_err(failed),
        None => Ok(None),
    }
}

fn reference(decl: ReferenceDecl) -> ResourceRef {
    ResourceRef {
        name: decl.name,
        type_hint: decl.type_hint,
        explicit_target: decl.target,
        binding: None,
    }
}

fn component(decl: ComponentDecl) -> Component {
    let mut component = Component::new(decl.name, decl.class, decl.component_type);
    component.listener_interface = decl.listener;
    component.refs = decl.refs.into_iter().map(reference).collect();
    component.unit_refs = decl
        .units
        .into_iter()
        .map(|unit| UnitRef {
            unit_name: unit.unit,
            ..UnitRef::new(unit.name)
        })
        .collect();
    component.properties = decl.properties;
    component
}

fn apply_module(module: &mut Module, decl: ModuleDescriptor) {
    module.descriptors.standard_name = decl.name;
    for decl in decl.components {
        if let Err(duplicate) = module.add_component(component(decl)) {
            let target = module.display_name();
            module.validation.fail(
                target,
                "component.duplicate-name",
                format!("component `{}` is declared more than once", duplicate.name),
            );
        }
    }
    module.refs.extend(decl.refs.into_iter().map(reference));
}

fn apply_vendor(graph: &mut AppGraph, id: ModuleId, decl: VendorDescriptor) {
    for resource in decl.resources {
        if graph.resources.iter().any(|r| r.id == resource.id) {
            let target = graph.display_name();
            graph.validation.fail(
                target,
                "resource.duplicate-id",
                format!("resource `{}` is declared more than once", resource.id),
            );
            continue;
        }
        graph.resources.push(DeclaredResource {
            properties: resource.properties,
            ..DeclaredResource::new(resource.id, resource.resource_type)
        });
    }
    for container in decl.containers {
        if graph.containers.iter().any(|c| c.id == container.id) {
            let target = graph.display_name();
            graph.validation.fail(
                target,
                "container.duplicate-id",
                format!("container `{}` is declared more than once", container.id),
            );
            continue;
        }
        graph.containers.push(DeclaredContainer {
            listener_interface: container.listener,
            properties: container.properties,
            ..DeclaredContainer::new(container.id, container.component_type)
        });
    }

    let module = graph.module_mut(id);
    module.descriptors.vendor_name = decl.name;
    for deployment in decl.deployments {
        module.descriptors.deployments.insert(
            deployment.component,
            DeploymentOverrides {
                deployment_id: deployment.deployment_id,
                container_id: deployment.container_id,
                resource_links: deployment.resource_links,
            },
        );
    }
}

/// `url` with a trailing slash, so relative paths resolve below it.
fn as_directory(url: &Url) -> Url {
    let mut dir = url.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

fn apply_persistence(graph: &mut AppGraph, id: ModuleId, decl: PersistenceDescriptor) {
    let module = graph.module(id);
    let target = module.display_name();
    let Some(location) = module.location.clone() else {
        graph.module_mut(id).validation.warn(
            target,
            "unit.no-location",
            "module has no location; its data-access units are ignored",
        );
        return;
    };

    for unit in decl.units {
        let root = match unit.root.as_deref() {
            None | Some("" | ".") => location.clone(),
            Some(relative) => match as_directory(&location).join(relative) {
                Ok(root) => root,
                Err(err) => {
                    graph.module_mut(id).validation.fail(
                        target.clone(),
                        "unit.bad-root",
                        format!("unit `{}` has an invalid root `{relative}`: {err}", unit.name),
                    );
                    continue;
                }
            },
        };
        let data_source = |name: Option<String>| {
            name.filter(|n| !n.is_empty())
                .map(|n| ResourceRef::new(n).of_type(DATA_SOURCE_TYPE))
        };
        let mut shared = SharedUnit::new(unit.name, root);
        shared.data_source = data_source(unit.data_source);
        shared.non_jta_data_source = data_source(unit.non_jta_data_source);
        let unit = shared;
        if graph.shared_units.iter().all(|u| u.id() != unit.id()) {
            tracing::debug!(unit = %unit.id(), module = %target, "declared data-access unit");
            graph.shared_units.push(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs, sync::Mutex};

    use keel_graph::{ModuleKind, RawDescriptor};
    use keel_scanner::{DescriptorError, DescriptorSource, FileDescriptorSource};
    use serde_json::json;

    use super::*;
    use crate::{DeployError, passes::Pipeline, passes::fixture::Fixture};

    /// Serves descriptors from memory, keyed by location and file name.
    #[derive(Default)]
    struct MemorySource {
        files: BTreeMap<(String, &'static str), String>,
        reads: Mutex<usize>,
    }

    impl MemorySource {
        fn with(mut self, location: &str, name: DescriptorName, content: serde_json::Value) -> Self {
            self.files
                .insert((location.to_string(), name.file_name()), content.to_string());
            self
        }
    }

    impl DescriptorSource for MemorySource {
        fn parse(
            &self,
            location: &Url,
            name: DescriptorName,
        ) -> Result<Option<Descriptor>, DescriptorError> {
            *self.reads.lock().unwrap() += 1;
            self.files
                .get(&(location.to_string(), name.file_name()))
                .map(|content| name.parse(location.as_str(), content))
                .transpose()
        }
    }

    fn run(graph: &mut AppGraph, source: &dyn DescriptorSource) -> Result<(), StageError> {
        let fixture = Fixture::new();
        let cx = StageContext {
            descriptors: source,
            ..fixture.cx()
        };
        ReadDescriptors.apply(graph, &cx)
    }

    fn module_at(graph: &mut AppGraph, location: &str) -> ModuleId {
        let module = graph.add_module(ModuleKind::Container);
        module.location = Some(Url::parse(location).unwrap());
        module.id
    }

    #[test]
    fn module_and_vendor_descriptors_populate_the_graph() {
        let mut graph = AppGraph::new();
        let id = module_at(&mut graph, "file:///app/orders");
        let source = MemorySource::default()
            .with(
                "file:///app/orders",
                DescriptorName::Module,
                json!({
                    "name": "orders-module",
                    "components": [{
                        "name": "Orders",
                        "class": "com.acme.Orders",
                        "type": "stateless",
                        "refs": [{ "name": "jdbc/orders", "type": "DataSource" }],
                        "units": [{ "name": "em", "unit": "orders" }]
                    }],
                    "refs": [{ "name": "jms/events", "type": "Queue" }]
                }),
            )
            .with(
                "file:///app/orders",
                DescriptorName::Vendor,
                json!({
                    "name": "orders",
                    "deployments": [{
                        "component": "Orders",
                        "deployment_id": "OrdersBean",
                        "resource_links": { "jdbc/orders": "ordersDb" }
                    }],
                    "resources": [{ "id": "ordersDb", "type": "DataSource" }],
                    "containers": [{ "id": "fast", "type": "stateless" }]
                }),
            )
            .with(
                "file:///app/orders",
                DescriptorName::Persistence,
                json!({ "units": [
                    { "name": "orders", "data_source": "ordersDb", "non_jta_data_source": "" },
                    { "name": "audit", "root": "../lib" }
                ] }),
            );

        run(&mut graph, &source).unwrap();

        let module = graph.module(id);
        assert_eq!(module.descriptors.standard_name.as_deref(), Some("orders-module"));
        assert_eq!(module.descriptors.vendor_name.as_deref(), Some("orders"));
        let orders = &module.components["Orders"];
        assert_eq!(orders.refs[0].type_hint.as_deref(), Some("DataSource"));
        assert_eq!(orders.unit_refs[0].unit_name.as_deref(), Some("orders"));
        assert_eq!(module.refs[0].name, "jms/events");
        assert_eq!(
            module.descriptors.deployments["Orders"].deployment_id.as_deref(),
            Some("OrdersBean")
        );
        assert_eq!(graph.resources[0].id, "ordersDb");
        assert_eq!(graph.containers[0].id, "fast");

        let units: Vec<String> = graph.shared_units.iter().map(|u| u.id()).collect();
        assert_eq!(
            units,
            vec!["orders@file:///app/orders", "audit@file:///app/lib"]
        );
        let source = graph.shared_units[0].data_source.as_ref().unwrap();
        assert_eq!(source.name, "ordersDb");
        assert_eq!(source.type_hint.as_deref(), Some(DATA_SOURCE_TYPE));
        assert!(graph.shared_units[0].non_jta_data_source.is_none());
        assert_eq!(graph.shared_units[1].data_sources().count(), 0);
    }

    #[test]
    fn inline_descriptor_wins_over_source() {
        let mut graph = AppGraph::new();
        let id = module_at(&mut graph, "file:///app/orders");
        graph.raw_descriptors.push(RawDescriptor {
            module: id,
            file_name: "META-INF/module-properties.json".to_string(),
            content: json!({ "timeout": "5" }).to_string(),
        });
        graph
            .module_mut(id)
            .properties
            .insert("pool".to_string(), "explicit".to_string());
        let source = MemorySource::default().with(
            "file:///app/orders",
            DescriptorName::ModuleProperties,
            json!({ "timeout": "99", "pool": "from-file" }),
        );

        run(&mut graph, &source).unwrap();

        let properties = &graph.module(id).properties;
        assert_eq!(properties["timeout"], "5");
        assert_eq!(properties["pool"], "explicit");
    }

    #[test]
    fn generated_views_only_read_client_descriptors() {
        let mut graph = AppGraph::new();
        let view = graph.add_module(ModuleKind::Client);
        view.generated = true;
        view.location = Some(Url::parse("file:///app/orders").unwrap());
        let id = view.id;
        let source = MemorySource::default()
            .with(
                "file:///app/orders",
                DescriptorName::Client,
                json!({ "main_class": "a.Main" }),
            )
            .with("file:///app/orders", DescriptorName::Module, json!({ "name": "x" }));

        run(&mut graph, &source).unwrap();

        let module = graph.module(id);
        assert_eq!(
            module.descriptors.client.as_ref().unwrap().main_class.as_deref(),
            Some("a.Main")
        );
        assert!(module.descriptors.standard_name.is_none());
        assert_eq!(*source.reads.lock().unwrap(), 1);
    }

    #[test]
    fn malformed_descriptor_aborts_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        fs::write(dir.path().join("META-INF/vendor.json"), "{ \"nmae\": 1 }").unwrap();

        let mut graph = AppGraph::new();
        let module = graph.add_module(ModuleKind::Container);
        module.explicit_name = Some("orders".to_string());
        module.location = Some(Url::from_directory_path(dir.path()).unwrap());

        let fixture = Fixture::new();
        let cx = StageContext {
            descriptors: &FileDescriptorSource,
            ..fixture.cx()
        };
        let err = Pipeline::standard().run(graph, &cx).unwrap_err();
        let DeployError::Stage { stage, module, .. } = &err else {
            panic!("expected a stage error, got {err:?}");
        };
        assert_eq!(*stage, "read-descriptors");
        assert_eq!(module.as_deref(), Some("orders"));
    }
}
