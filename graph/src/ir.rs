use std::collections::BTreeMap;

use keel_config::PropertyMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    AppGraph, Component, ComponentType, DeclaredContainer, DeclaredResource, ModuleKind, Origin,
    Provenance, ResourceRef, UnitOwner,
};

pub const RESOLVED_GRAPH_SCHEMA: &str = "keel.resolved-graph";
pub const RESOLVED_GRAPH_VERSION: u32 = 1;

/// Serializable view of a fully resolved graph, as handed to the assembly side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedGraphIr {
    pub schema: String,
    pub version: u32,
    pub application: String,
    pub properties: PropertyMap,
    pub modules: Vec<ModuleIr>,
    pub resources: Vec<ResourceIr>,
    pub containers: Vec<ContainerIr>,
    pub units: Vec<UnitIr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleIr {
    pub identity: String,
    pub kind: ModuleKind,
    pub generated: bool,
    pub location: Option<Url>,
    pub properties: PropertyMap,
    pub refs: Vec<BindingIr>,
    pub components: Vec<ComponentIr>,
    #[serde(default)]
    pub watched: Vec<Url>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentIr {
    pub name: String,
    pub deployment_id: String,
    pub class_name: String,
    pub component_type: ComponentType,
    pub container_id: Option<String>,
    pub properties: PropertyMap,
    pub refs: Vec<BindingIr>,
    /// Unit reference name -> unit id.
    pub units: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindingIr {
    pub name: String,
    pub target: String,
    pub provenance: Provenance,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceIr {
    pub id: String,
    pub types: Vec<String>,
    pub properties: PropertyMap,
    pub origin: Origin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerIr {
    pub id: String,
    pub component_type: ComponentType,
    pub listener_interface: Option<String>,
    pub properties: PropertyMap,
    pub origin: Origin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitIr {
    pub id: String,
    pub name: String,
    pub root: Url,
    /// Owning module identity; `None` for the application root.
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<BindingIr>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResolvedGraphIrError {
    #[error("graph is not deployable: {errors} error(s), {failures} failure(s)")]
    NotDeployable { errors: usize, failures: usize },
    #[error("{module} has no identity")]
    MissingIdentity { module: String },
    #[error("component `{component}` in {module} has no deployment id")]
    MissingDeploymentId { module: String, component: String },
    #[error("reference `{reference}` of {owner} is unresolved")]
    PendingReference { owner: String, reference: String },
}

impl TryFrom<&AppGraph> for ResolvedGraphIr {
    type Error = ResolvedGraphIrError;

    fn try_from(graph: &AppGraph) -> Result<Self, Self::Error> {
        let diagnostics = graph.diagnostics();
        if !diagnostics.is_deployable() {
            return Err(ResolvedGraphIrError::NotDeployable {
                errors: diagnostics.errors.len(),
                failures: diagnostics.failures.len(),
            });
        }

        let mut modules = Vec::new();
        for (_, module) in graph.modules_iter() {
            let Some(identity) = module.identity.as_ref() else {
                return Err(ResolvedGraphIrError::MissingIdentity {
                    module: module.display_name(),
                });
            };
            let refs = bindings_ir(identity.as_str(), &module.refs)?;
            let components = module
                .components
                .values()
                .map(|component| component_ir(identity.as_str(), component))
                .collect::<Result<Vec<_>, _>>()?;
            modules.push(ModuleIr {
                identity: identity.to_string(),
                kind: module.kind,
                generated: module.generated,
                location: module.location.clone(),
                properties: module.effective_properties.clone(),
                refs,
                components,
                watched: module.watched.iter().cloned().collect(),
            });
        }

        let units = graph
            .shared_units
            .iter()
            .map(|unit| {
                Ok(UnitIr {
                    id: unit.id(),
                    name: unit.name.clone(),
                    root: unit.root.clone(),
                    owner: match unit.owner {
                        Some(UnitOwner::Module(id)) => graph
                            .get_module(id)
                            .and_then(|m| m.identity.as_ref())
                            .map(ToString::to_string),
                        Some(UnitOwner::Application) | None => None,
                    },
                    data_sources: bindings_ir(&unit.id(), unit.data_sources())?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            schema: RESOLVED_GRAPH_SCHEMA.to_string(),
            version: RESOLVED_GRAPH_VERSION,
            application: graph.display_name(),
            properties: graph.effective_properties.clone(),
            modules,
            resources: graph.resources.iter().map(ResourceIr::from).collect(),
            containers: graph.containers.iter().map(ContainerIr::from).collect(),
            units,
        })
    }
}

fn component_ir(module: &str, component: &Component) -> Result<ComponentIr, ResolvedGraphIrError> {
    let Some(deployment_id) = component.deployment_id.clone() else {
        return Err(ResolvedGraphIrError::MissingDeploymentId {
            module: module.to_string(),
            component: component.name.clone(),
        });
    };
    let owner = format!("{module}/{}", component.name);
    Ok(ComponentIr {
        name: component.name.clone(),
        deployment_id,
        class_name: component.class_name.clone(),
        component_type: component.component_type,
        container_id: component.container_id.clone(),
        properties: component.effective_properties.clone(),
        refs: bindings_ir(&owner, &component.refs)?,
        units: component
            .unit_refs
            .iter()
            .filter_map(|r| r.resolved.clone().map(|unit| (r.name.clone(), unit)))
            .collect(),
    })
}

fn bindings_ir<'a>(
    owner: &str,
    refs: impl IntoIterator<Item = &'a ResourceRef>,
) -> Result<Vec<BindingIr>, ResolvedGraphIrError> {
    refs.into_iter()
        .map(|reference| match &reference.binding {
            Some(binding) => Ok(BindingIr {
                name: reference.name.clone(),
                target: binding.target.clone(),
                provenance: binding.provenance,
            }),
            None => Err(ResolvedGraphIrError::PendingReference {
                owner: owner.to_string(),
                reference: reference.name.clone(),
            }),
        })
        .collect()
}

impl From<&DeclaredResource> for ResourceIr {
    fn from(resource: &DeclaredResource) -> Self {
        Self {
            id: resource.id.clone(),
            types: resource.types.clone(),
            properties: resource.properties.clone(),
            origin: resource.origin.clone(),
        }
    }
}

impl From<&DeclaredContainer> for ContainerIr {
    fn from(container: &DeclaredContainer) -> Self {
        Self {
            id: container.id.clone(),
            component_type: container.component_type,
            listener_interface: container.listener_interface.clone(),
            properties: container.properties.clone(),
            origin: container.origin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Identity, ResolvedBinding};

    fn resolved_graph() -> AppGraph {
        let mut graph = AppGraph::new();
        graph.identity = Some(Identity::from("shop"));
        graph
            .resources
            .push(DeclaredResource::new("orders-db", "DataSource"));

        let module = graph.add_module(ModuleKind::Container);
        module.identity = Some(Identity::from("orders"));
        let mut component = Component::new("Orders", "com.acme.Orders", ComponentType::Stateless);
        component.deployment_id = Some("Orders".to_string());
        component.container_id = Some("stateless".to_string());
        let mut reference = ResourceRef::new("jdbc/orders").of_type("DataSource");
        reference.binding = Some(ResolvedBinding {
            target: "orders-db".to_string(),
            provenance: Provenance::ByType,
        });
        component.refs.push(reference);
        module.add_component(component).expect("unique component");
        graph
    }

    #[test]
    fn resolved_graph_serializes_v1_shape() {
        let graph = resolved_graph();
        let ir = ResolvedGraphIr::try_from(&graph).expect("graph is resolved");
        let value = serde_json::to_value(&ir).expect("serialize");

        assert_eq!(value["schema"], json!(RESOLVED_GRAPH_SCHEMA));
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["application"], json!("shop"));
        assert_eq!(
            value["modules"][0]["components"][0]["refs"][0],
            json!({ "name": "jdbc/orders", "target": "orders-db", "provenance": "by-type" })
        );
        assert_eq!(value["resources"][0]["origin"], json!({ "kind": "declared" }));
    }

    #[test]
    fn pending_reference_blocks_ir() {
        let mut graph = resolved_graph();
        let module = graph.module_mut(crate::ModuleId(0));
        module
            .components
            .get_mut("Orders")
            .expect("component")
            .refs
            .push(ResourceRef::new("jms/events"));

        let err = ResolvedGraphIr::try_from(&graph).unwrap_err();
        assert!(
            matches!(err, ResolvedGraphIrError::PendingReference { ref reference, .. } if reference == "jms/events"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unit_data_sources_carry_their_bindings() {
        let mut graph = resolved_graph();
        let root = Url::parse("file:///app/orders/").expect("url");
        let mut unit = crate::SharedUnit::new("orders", root);
        unit.owner = Some(UnitOwner::Module(crate::ModuleId(0)));
        let mut source = ResourceRef::new("jdbc/orders").of_type("DataSource");
        source.binding = Some(ResolvedBinding {
            target: "orders-db".to_string(),
            provenance: Provenance::ByName,
        });
        unit.data_source = Some(source);
        unit.non_jta_data_source = Some(ResourceRef::new("jdbc/reports").of_type("DataSource"));
        graph.shared_units.push(unit);

        let err = ResolvedGraphIr::try_from(&graph).unwrap_err();
        assert!(
            matches!(err, ResolvedGraphIrError::PendingReference { ref owner, .. } if owner == "orders@file:///app/orders/"),
            "unexpected error: {err}"
        );

        graph.shared_units[0].non_jta_data_source = None;
        let ir = ResolvedGraphIr::try_from(&graph).expect("graph is resolved");
        assert_eq!(ir.units[0].owner.as_deref(), Some("orders"));
        assert_eq!(ir.units[0].data_sources.len(), 1);
        assert_eq!(ir.units[0].data_sources[0].target, "orders-db");
    }

    #[test]
    fn failures_block_ir() {
        let mut graph = resolved_graph();
        graph.validation.fail("shop", "link.unresolved", "missing");
        let err = ResolvedGraphIr::try_from(&graph).unwrap_err();
        assert!(matches!(
            err,
            ResolvedGraphIrError::NotDeployable { failures: 1, .. }
        ));
    }
}
