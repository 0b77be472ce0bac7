use std::{collections::HashMap, sync::Arc};

use keel_config::PropertyMap;
use keel_graph::ComponentType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Resource,
    Container,
}

/// A provider the auto-linker can instantiate when nothing declared fits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderTemplate {
    pub id: String,
    pub kind: ProviderKind,
    /// Resource types, or for containers the component types and listener interfaces served.
    pub types: Vec<String>,
    pub properties: PropertyMap,
}

impl ProviderTemplate {
    pub fn resource(id: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Resource,
            types: vec![ty.into()],
            properties: PropertyMap::new(),
        }
    }

    pub fn container(id: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Container,
            types: vec![component_type.as_str().to_string()],
            properties: PropertyMap::new(),
        }
    }

    pub fn also_provides(mut self, ty: impl Into<String>) -> Self {
        self.types.push(ty.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn provides(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }

    /// Component type served by a container template.
    pub fn component_type(&self) -> Option<ComponentType> {
        if self.kind != ProviderKind::Container {
            return None;
        }
        self.types.iter().find_map(|ty| component_type_named(ty))
    }

    /// Listener interfaces served by a container template.
    pub fn listener_interfaces(&self) -> impl Iterator<Item = &str> {
        self.types
            .iter()
            .map(String::as_str)
            .filter(|ty| component_type_named(ty).is_none())
    }
}

fn component_type_named(name: &str) -> Option<ComponentType> {
    [
        ComponentType::Stateless,
        ComponentType::Stateful,
        ComponentType::Singleton,
        ComponentType::MessageDriven,
        ComponentType::Managed,
    ]
    .into_iter()
    .find(|ty| ty.as_str() == name)
}

/// Provider templates available to the auto-linker.
pub trait ProviderCatalog: Send + Sync {
    fn lookup(&self, id: &str) -> Option<&ProviderTemplate>;

    fn has_provider(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// The template used when a `ty` of `kind` must be created without a named provider.
    fn default_for(&self, kind: ProviderKind, ty: &str) -> Option<&ProviderTemplate>;
}

/// In-memory catalog.
///
/// Cheap to clone; mutation copies on write so a configured catalog can be shared and
/// specialised per deployment.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    providers: Arc<HashMap<String, ProviderTemplate>>,
    defaults: Arc<HashMap<(ProviderKind, String), String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in providers for the common resource types and every component type.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        for template in [
            ProviderTemplate::resource("Default Database", "DataSource")
                .with_property("jdbc-url", "jdbc:hsqldb:mem:keel")
                .with_property("user-name", "sa")
                .with_property("max-active", "20"),
            ProviderTemplate::resource("Default Connection Factory", "ConnectionFactory")
                .also_provides("QueueConnectionFactory")
                .also_provides("TopicConnectionFactory")
                .with_property("pool-max-size", "10"),
            ProviderTemplate::resource("Default Queue", "Queue"),
            ProviderTemplate::resource("Default Topic", "Topic"),
            ProviderTemplate::resource("Default Executor", "ManagedExecutorService")
                .with_property("core", "5")
                .with_property("max", "25"),
            ProviderTemplate::container("Default Stateless Container", ComponentType::Stateless)
                .with_property("max-size", "10")
                .with_property("access-timeout", "30 seconds"),
            ProviderTemplate::container("Default Stateful Container", ComponentType::Stateful)
                .with_property("timeout", "20 minutes"),
            ProviderTemplate::container("Default Singleton Container", ComponentType::Singleton)
                .with_property("access-timeout", "30 seconds"),
            ProviderTemplate::container("Default MDB Container", ComponentType::MessageDriven)
                .also_provides("MessageListener")
                .with_property("instance-limit", "10"),
            ProviderTemplate::container("Default Managed Container", ComponentType::Managed),
        ] {
            catalog.insert_default(template);
        }
        catalog
    }

    pub fn insert(&mut self, template: ProviderTemplate) {
        Arc::make_mut(&mut self.providers).insert(template.id.clone(), template);
    }

    /// Insert `template` and make it the default for each of its types that has none.
    pub fn insert_default(&mut self, template: ProviderTemplate) {
        let defaults = Arc::make_mut(&mut self.defaults);
        for ty in &template.types {
            defaults
                .entry((template.kind, ty.clone()))
                .or_insert_with(|| template.id.clone());
        }
        self.insert(template);
    }

    /// Point the default for `ty` at an already inserted provider.
    pub fn set_default(&mut self, kind: ProviderKind, ty: impl Into<String>, id: impl Into<String>) {
        Arc::make_mut(&mut self.defaults).insert((kind, ty.into()), id.into());
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl ProviderCatalog for StaticCatalog {
    fn lookup(&self, id: &str) -> Option<&ProviderTemplate> {
        self.providers.get(id)
    }

    fn default_for(&self, kind: ProviderKind, ty: &str) -> Option<&ProviderTemplate> {
        let id = self.defaults.get(&(kind, ty.to_string()))?;
        self.providers.get(id).filter(|template| template.kind == kind)
    }
}
