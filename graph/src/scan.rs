use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Class markers the pipeline understands.
pub mod markers {
    /// Client-callable surface.
    pub const REMOTE: &str = "Remote";
    pub const STATELESS: &str = "Stateless";
    pub const STATEFUL: &str = "Stateful";
    pub const SINGLETON: &str = "Singleton";
    pub const MESSAGE_DRIVEN: &str = "MessageDriven";
    pub const MANAGED: &str = "ManagedBean";

    pub const COMPONENT_MARKERS: [&str; 5] =
        [STATELESS, STATEFUL, SINGLETON, MESSAGE_DRIVEN, MANAGED];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeSet<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub is_interface: bool,
    /// Declares a `main` entry point.
    #[serde(default)]
    pub has_main: bool,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeSet::new(),
            interfaces: Vec::new(),
            is_interface: false,
            has_main: false,
        }
    }

    pub fn annotated(mut self, marker: impl Into<String>) -> Self {
        self.annotations.insert(marker.into());
        self
    }

    pub fn implementing(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    pub fn with_main(mut self) -> Self {
        self.has_main = true;
        self
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Queryable result of scanning one module's classpath.
///
/// The marker index is built once on construction, so queries never rescan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ClassDescriptor>", into = "Vec<ClassDescriptor>")]
pub struct ClassIndex {
    classes: BTreeMap<String, ClassDescriptor>,
    by_marker: BTreeMap<String, BTreeSet<String>>,
}

impl ClassIndex {
    pub fn from_classes(classes: impl IntoIterator<Item = ClassDescriptor>) -> Self {
        let mut index = Self::default();
        for class in classes {
            index.insert(class);
        }
        index
    }

    fn insert(&mut self, class: ClassDescriptor) {
        if let Some(previous) = self.classes.get(&class.name) {
            for marker in &previous.annotations {
                if let Some(names) = self.by_marker.get_mut(marker) {
                    names.remove(&class.name);
                }
            }
        }
        for marker in &class.annotations {
            self.by_marker
                .entry(marker.clone())
                .or_default()
                .insert(class.name.clone());
        }
        self.classes.insert(class.name.clone(), class);
    }

    /// Fold `other` into this index; classes already present are replaced.
    pub fn merge(&mut self, other: ClassIndex) {
        for class in other.classes.into_values() {
            self.insert(class);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    /// Classes carrying `marker`, in name order.
    pub fn annotated_with<'a>(
        &'a self,
        marker: &str,
    ) -> impl Iterator<Item = &'a ClassDescriptor> + use<'a> {
        self.by_marker
            .get(marker)
            .into_iter()
            .flatten()
            .filter_map(|name| self.classes.get(name))
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.by_marker.get(marker).is_some_and(|names| !names.is_empty())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl From<Vec<ClassDescriptor>> for ClassIndex {
    fn from(value: Vec<ClassDescriptor>) -> Self {
        Self::from_classes(value)
    }
}

impl From<ClassIndex> for Vec<ClassDescriptor> {
    fn from(value: ClassIndex) -> Self {
        value.classes.into_values().collect()
    }
}
