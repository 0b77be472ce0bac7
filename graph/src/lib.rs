use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use keel_config::PropertyMap;
use serde::{Deserialize, Serialize};
use url::Url;

mod diagnostics;
pub mod graph;
pub mod ir;
mod scan;

pub use diagnostics::{Diagnostic, Diagnostics, Severity, ValidationContext};
pub use ir::{RESOLVED_GRAPH_SCHEMA, RESOLVED_GRAPH_VERSION, ResolvedGraphIr, ResolvedGraphIrError};
pub use scan::{ClassDescriptor, ClassIndex, markers};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub usize);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Stable, human-readable name of a module or application. Immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identity(Arc<str>);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Arc<str>> for Identity {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0.to_string()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    Container,
    Web,
    Client,
    DataUnit,
    Connector,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Container => "container",
            ModuleKind::Web => "web",
            ModuleKind::Client => "client",
            ModuleKind::DataUnit => "data-unit",
            ModuleKind::Connector => "connector",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque class loader handle; carried through resolution untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaderHandle(pub u64);

/// Where a module's scan result lives.
#[derive(Clone, Debug, Default)]
pub enum ScanSlot {
    #[default]
    Unscanned,
    Owned(Arc<ClassIndex>),
    /// Read-only view of another module's scan, looked up through the graph.
    Shared(ModuleId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    #[serde(default)]
    pub main_class: Option<String>,
}

/// Per-component settings from a vendor descriptor, applied once components are known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentOverrides {
    pub deployment_id: Option<String>,
    pub container_id: Option<String>,
    /// Reference name -> explicit target id.
    pub resource_links: BTreeMap<String, String>,
}

/// Names and fragments lifted out of a module's descriptors.
#[derive(Clone, Debug, Default)]
pub struct ModuleDescriptors {
    pub vendor_name: Option<String>,
    pub standard_name: Option<String>,
    pub client: Option<ClientDescriptor>,
    /// Keyed by component name.
    pub deployments: BTreeMap<String, DeploymentOverrides>,
}

/// Client-callable surface of a generated client view.
#[derive(Clone, Debug)]
pub struct ClientView {
    pub source: ModuleId,
    pub remote_interfaces: BTreeSet<String>,
    pub main_class: Option<String>,
}

impl ClientView {
    pub fn new(source: ModuleId) -> Self {
        Self {
            source,
            remote_interfaces: BTreeSet::new(),
            main_class: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Module {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub identity: Option<Identity>,
    pub explicit_name: Option<String>,
    pub uri: Option<String>,
    pub location: Option<Url>,
    pub classpath: Vec<Url>,
    pub loader: LoaderHandle,

    /// Declared module-level properties.
    pub properties: PropertyMap,
    /// Filled by the module properties stage.
    pub effective_properties: PropertyMap,

    pub components: BTreeMap<String, Component>,
    /// References declared on the module itself (e.g. by a web front-end).
    pub refs: Vec<ResourceRef>,
    /// Resources whose change triggers a redeploy.
    pub watched: BTreeSet<Url>,

    /// True if the pipeline created this module speculatively.
    pub generated: bool,
    pub scan: ScanSlot,
    pub descriptors: ModuleDescriptors,
    pub client: Option<ClientView>,
    pub validation: ValidationContext,
}

impl Module {
    pub fn new(id: ModuleId, kind: ModuleKind) -> Self {
        Self {
            id,
            kind,
            identity: None,
            explicit_name: None,
            uri: None,
            location: None,
            classpath: Vec::new(),
            loader: LoaderHandle::default(),
            properties: PropertyMap::new(),
            effective_properties: PropertyMap::new(),
            components: BTreeMap::new(),
            refs: Vec::new(),
            watched: BTreeSet::new(),
            generated: false,
            scan: ScanSlot::Unscanned,
            descriptors: ModuleDescriptors::default(),
            client: None,
            validation: ValidationContext::default(),
        }
    }

    /// Identity if assigned, otherwise a positional placeholder for diagnostics.
    pub fn display_name(&self) -> String {
        match &self.identity {
            Some(identity) => identity.to_string(),
            None => match &self.explicit_name {
                Some(name) if !name.trim().is_empty() => name.clone(),
                _ => self.id.to_string(),
            },
        }
    }

    /// Insert a component; an existing component with the same name is returned unchanged.
    pub fn add_component(&mut self, component: Component) -> Result<(), Component> {
        if self.components.contains_key(&component.name) {
            return Err(component);
        }
        self.components.insert(component.name.clone(), component);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentType {
    Stateless,
    Stateful,
    Singleton,
    MessageDriven,
    Managed,
}

impl ComponentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Stateless => "stateless",
            ComponentType::Stateful => "stateful",
            ComponentType::Singleton => "singleton",
            ComponentType::MessageDriven => "message-driven",
            ComponentType::Managed => "managed",
        }
    }

    /// Component type declared by a scanned class marker.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            markers::STATELESS => Some(ComponentType::Stateless),
            markers::STATEFUL => Some(ComponentType::Stateful),
            markers::SINGLETON => Some(ComponentType::Singleton),
            markers::MESSAGE_DRIVEN => Some(ComponentType::MessageDriven),
            markers::MANAGED => Some(ComponentType::Managed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Component {
    pub name: String,
    pub class_name: String,
    pub component_type: ComponentType,
    /// Message listener interface of a message-driven component.
    pub listener_interface: Option<String>,
    pub refs: Vec<ResourceRef>,
    pub unit_refs: Vec<UnitRef>,
    /// Explicit deployment id from a vendor descriptor, or the one resolved by the pipeline.
    pub deployment_id: Option<String>,
    pub container_id: Option<String>,
    pub properties: PropertyMap,
    pub effective_properties: PropertyMap,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        component_type: ComponentType,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            component_type,
            listener_interface: None,
            refs: Vec::new(),
            unit_refs: Vec::new(),
            deployment_id: None,
            container_id: None,
            properties: PropertyMap::new(),
            effective_properties: PropertyMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    pub type_hint: Option<String>,
    pub explicit_target: Option<String>,
    pub binding: Option<ResolvedBinding>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
            explicit_target: None,
            binding: None,
        }
    }

    pub fn of_type(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    pub fn targeting(mut self, target: impl Into<String>) -> Self {
        self.explicit_target = Some(target.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Explicit,
    ByName,
    ByType,
    AutoCreated,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Explicit => "explicit",
            Provenance::ByName => "by-name",
            Provenance::ByType => "by-type",
            Provenance::AutoCreated => "auto-created",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedBinding {
    pub target: String,
    pub provenance: Provenance,
}

/// Reference from a component to a shared data-access unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitRef {
    pub name: String,
    /// Unit name requested by the reference, if it names one.
    pub unit_name: Option<String>,
    /// Id of the linked [`SharedUnit`].
    pub resolved: Option<String>,
}

impl UnitRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit_name: None,
            resolved: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitOwner {
    Module(ModuleId),
    Application,
}

/// Resource type a unit's data sources are linked as.
pub const DATA_SOURCE_TYPE: &str = "DataSource";

/// A data-access unit that any sibling module of the package could claim.
#[derive(Clone, Debug)]
pub struct SharedUnit {
    pub name: String,
    pub root: Url,
    pub owner: Option<UnitOwner>,
    pub data_source: Option<ResourceRef>,
    pub non_jta_data_source: Option<ResourceRef>,
}

impl SharedUnit {
    pub fn new(name: impl Into<String>, root: Url) -> Self {
        Self {
            name: name.into(),
            root,
            owner: None,
            data_source: None,
            non_jta_data_source: None,
        }
    }

    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.root)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &ResourceRef> {
        self.data_source.iter().chain(&self.non_jta_data_source)
    }

    pub fn data_sources_mut(&mut self) -> impl Iterator<Item = &mut ResourceRef> {
        self.data_source.iter_mut().chain(&mut self.non_jta_data_source)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Origin {
    Declared,
    AutoCreated { template: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredResource {
    pub id: String,
    /// Types this resource can be bound as; the first entry is its primary type.
    pub types: Vec<String>,
    pub properties: PropertyMap,
    pub origin: Origin,
}

impl DeclaredResource {
    pub fn new(id: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: vec![ty.into()],
            properties: PropertyMap::new(),
            origin: Origin::Declared,
        }
    }

    pub fn provides(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredContainer {
    pub id: String,
    pub component_type: ComponentType,
    pub listener_interface: Option<String>,
    pub properties: PropertyMap,
    pub origin: Origin,
}

impl DeclaredContainer {
    pub fn new(id: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            id: id.into(),
            component_type,
            listener_interface: None,
            properties: PropertyMap::new(),
            origin: Origin::Declared,
        }
    }
}

/// A descriptor supplied inline instead of read from the module location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDescriptor {
    pub module: ModuleId,
    pub file_name: String,
    pub content: String,
}

/// Where a pending reference lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRef {
    pub module: ModuleId,
    pub component: Option<String>,
    pub reference: String,
}

#[derive(Clone, Debug, Default)]
pub struct AppGraph {
    pub identity: Option<Identity>,
    pub explicit_name: Option<String>,
    pub location: Option<Url>,
    /// True for a multi-module application package.
    pub packaged: bool,

    pub modules: Vec<Option<Module>>,

    pub system_properties: PropertyMap,
    pub deployment_properties: PropertyMap,
    /// Trusted overrides, prefix stripped; the highest-precedence layer.
    pub trusted_properties: PropertyMap,
    /// Declared application-level properties.
    pub properties: PropertyMap,
    pub effective_properties: PropertyMap,

    pub raw_descriptors: Vec<RawDescriptor>,
    pub shared_units: Vec<SharedUnit>,
    pub resources: Vec<DeclaredResource>,
    pub containers: Vec<DeclaredContainer>,
    pub validation: ValidationContext,
}

impl AppGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, kind: ModuleKind) -> &mut Module {
        let id = ModuleId(self.modules.len());
        self.modules.push(Some(Module::new(id, kind)));
        self.module_mut(id)
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.modules[id.0].as_ref().expect("module should exist")
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        self.modules[id.0].as_mut().expect("module should exist")
    }

    pub fn get_module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.0).and_then(Option::as_ref)
    }

    /// Where diagnostics about a unit owned by `owner` go; unowned units report on the root.
    pub fn unit_validation_mut(&mut self, owner: Option<UnitOwner>) -> &mut ValidationContext {
        match owner {
            Some(UnitOwner::Module(id)) if self.get_module(id).is_some() => {
                &mut self.module_mut(id).validation
            }
            _ => &mut self.validation,
        }
    }

    pub fn modules_iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .filter_map(|(idx, module)| module.as_ref().map(|m| (ModuleId(idx), m)))
    }

    pub fn modules_iter_mut(&mut self) -> impl Iterator<Item = (ModuleId, &mut Module)> {
        self.modules
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, module)| module.as_mut().map(|m| (ModuleId(idx), m)))
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules_iter().map(|(id, _)| id).collect()
    }

    /// Remove a module, leaving its slot empty so other ids stay valid.
    pub fn remove_module(&mut self, id: ModuleId) -> Option<Module> {
        self.modules.get_mut(id.0).and_then(Option::take)
    }

    pub fn module_by_identity(&self, identity: &str) -> Option<ModuleId> {
        self.modules_iter()
            .find(|(_, m)| m.identity.as_ref().is_some_and(|i| i.as_str() == identity))
            .map(|(id, _)| id)
    }

    /// Scan result visible to `id`, following shared slots to their owner.
    pub fn scan_for(&self, id: ModuleId) -> Option<&ClassIndex> {
        let mut current = id;
        for _ in 0..self.modules.len() {
            match &self.get_module(current)?.scan {
                ScanSlot::Unscanned => return None,
                ScanSlot::Owned(index) => return Some(index),
                ScanSlot::Shared(owner) => current = *owner,
            }
        }
        None
    }

    pub fn display_name(&self) -> String {
        match &self.identity {
            Some(identity) => identity.to_string(),
            None => self
                .explicit_name
                .clone()
                .unwrap_or_else(|| "application".to_string()),
        }
    }

    /// References that still carry no binding.
    pub fn pending_refs(&self) -> Vec<PendingRef> {
        let mut out = Vec::new();
        for (id, module) in self.modules_iter() {
            for reference in &module.refs {
                if reference.binding.is_none() {
                    out.push(PendingRef {
                        module: id,
                        component: None,
                        reference: reference.name.clone(),
                    });
                }
            }
            for component in module.components.values() {
                for reference in &component.refs {
                    if reference.binding.is_none() {
                        out.push(PendingRef {
                            module: id,
                            component: Some(component.name.clone()),
                            reference: reference.name.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// Root diagnostics followed by each live module's, in module order.
    pub fn diagnostics(&self) -> Diagnostics {
        let mut out = Diagnostics::default();
        out.extend(&self.validation);
        for (_, module) in self.modules_iter() {
            out.extend(&module.validation);
        }
        out
    }

    pub fn has_errors(&self) -> bool {
        self.validation.has_errors() || self.modules_iter().any(|(_, m)| m.validation.has_errors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_scan_resolves_through_owner() {
        let mut graph = AppGraph::new();
        let owner = graph.add_module(ModuleKind::Container).id;
        let index = ClassIndex::from_classes(vec![ClassDescriptor::new("com.acme.Api")]);
        graph.module_mut(owner).scan = ScanSlot::Owned(Arc::new(index));

        let view = graph.add_module(ModuleKind::Client).id;
        graph.module_mut(view).scan = ScanSlot::Shared(owner);

        let seen = graph.scan_for(view).expect("client view sees owner scan");
        assert!(seen.get("com.acme.Api").is_some());

        graph.remove_module(owner);
        assert!(graph.scan_for(view).is_none());
    }

    #[test]
    fn pending_refs_lists_unbound_references() {
        let mut graph = AppGraph::new();
        let module = graph.add_module(ModuleKind::Container);
        module.refs.push(ResourceRef::new("jdbc/audit"));
        let mut component = Component::new("Orders", "com.acme.Orders", ComponentType::Stateless);
        component.refs.push(ResourceRef::new("jdbc/orders"));
        let mut bound = ResourceRef::new("jms/events");
        bound.binding = Some(ResolvedBinding {
            target: "events".to_string(),
            provenance: Provenance::ByName,
        });
        component.refs.push(bound);
        module.add_component(component).expect("unique component");

        let pending = graph.pending_refs();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].reference, "jdbc/audit");
        assert_eq!(pending[1].component.as_deref(), Some("Orders"));
    }

    #[test]
    fn duplicate_component_name_is_rejected() {
        let mut module = Module::new(ModuleId(0), ModuleKind::Container);
        module
            .add_component(Component::new("A", "a.A", ComponentType::Singleton))
            .expect("first insert");
        let rejected = module
            .add_component(Component::new("A", "b.A", ComponentType::Stateless))
            .expect_err("duplicate name");
        assert_eq!(rejected.class_name, "b.A");
        assert_eq!(module.components["A"].class_name, "a.A");
    }

    #[test]
    fn diagnostics_aggregate_root_then_modules() {
        let mut graph = AppGraph::new();
        graph.validation.warn("app", "root.warning", "root");
        let id = graph.add_module(ModuleKind::Web).id;
        graph.module_mut(id).validation.fail("web", "link.unresolved", "x");

        let diagnostics = graph.diagnostics();
        assert_eq!(diagnostics.warnings.len(), 1);
        assert_eq!(diagnostics.failures.len(), 1);
        assert!(!diagnostics.is_deployable());
        assert!(graph.has_errors());
    }
}
