//! Declarative module descriptors and where they come from.
//!
//! Each module may carry up to six JSON descriptors under `META-INF/`. Their content is
//! typed here; interpreting it is left to the pipeline.

use std::{collections::BTreeMap, io, path::Path};

use keel_config::PropertyMap;
use keel_graph::{ClientDescriptor, ComponentType};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorName {
    /// Standard module descriptor: name, components and references.
    Module,
    /// Vendor descriptor: deployment ids, container choice, resource links.
    Vendor,
    Client,
    Persistence,
    ModuleProperties,
    ApplicationProperties,
}

impl DescriptorName {
    pub const MODULE_DESCRIPTORS: [DescriptorName; 5] = [
        DescriptorName::Module,
        DescriptorName::Vendor,
        DescriptorName::Client,
        DescriptorName::Persistence,
        DescriptorName::ModuleProperties,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            DescriptorName::Module => "module.json",
            DescriptorName::Vendor => "vendor.json",
            DescriptorName::Client => "application-client.json",
            DescriptorName::Persistence => "persistence.json",
            DescriptorName::ModuleProperties => "module-properties.json",
            DescriptorName::ApplicationProperties => "application-properties.json",
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let name = file_name.rsplit('/').next().unwrap_or(file_name);
        Self::MODULE_DESCRIPTORS
            .into_iter()
            .chain([DescriptorName::ApplicationProperties])
            .find(|candidate| candidate.file_name() == name)
    }

    /// Parse descriptor content; `origin` names the source in errors.
    pub fn parse(self, origin: &str, content: &str) -> Result<Descriptor, DescriptorError> {
        let malformed = |source| DescriptorError::Malformed {
            origin: origin.to_string(),
            name: self.file_name(),
            source,
        };
        Ok(match self {
            DescriptorName::Module => {
                Descriptor::Module(serde_json::from_str(content).map_err(malformed)?)
            }
            DescriptorName::Vendor => {
                Descriptor::Vendor(serde_json::from_str(content).map_err(malformed)?)
            }
            DescriptorName::Client => {
                Descriptor::Client(serde_json::from_str(content).map_err(malformed)?)
            }
            DescriptorName::Persistence => {
                Descriptor::Persistence(serde_json::from_str(content).map_err(malformed)?)
            }
            DescriptorName::ModuleProperties | DescriptorName::ApplicationProperties => {
                Descriptor::Properties(serde_json::from_str(content).map_err(malformed)?)
            }
        })
    }
}

impl std::fmt::Display for DescriptorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    Module(ModuleDescriptor),
    Vendor(VendorDescriptor),
    Client(ClientDescriptor),
    Persistence(PersistenceDescriptor),
    Properties(PropertyMap),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
    /// References declared on the module itself.
    #[serde(default)]
    pub refs: Vec<ReferenceDecl>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub name: String,
    pub class: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub listener: Option<String>,
    #[serde(default)]
    pub refs: Vec<ReferenceDecl>,
    #[serde(default)]
    pub units: Vec<UnitRefDecl>,
    #[serde(default)]
    pub properties: PropertyMap,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceDecl {
    pub name: String,
    #[serde(default, rename = "type")]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitRefDecl {
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VendorDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub deployments: Vec<DeploymentDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub containers: Vec<ContainerDecl>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentDecl {
    pub component: String,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    /// Reference name -> explicit target id.
    #[serde(default)]
    pub resource_links: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub listener: Option<String>,
    #[serde(default)]
    pub properties: PropertyMap,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceDescriptor {
    #[serde(default)]
    pub units: Vec<UnitDecl>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDecl {
    pub name: String,
    /// Unit root relative to the declaring module's location; defaults to the module itself.
    #[serde(default)]
    pub root: Option<String>,
    /// Transactional data source, resolved like any `DataSource` reference.
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub non_jta_data_source: Option<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum DescriptorError {
    #[error("malformed {name} in {origin}")]
    #[diagnostic(code(keel::descriptor::malformed))]
    Malformed {
        origin: String,
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {name} in {origin}")]
    #[diagnostic(code(keel::descriptor::io))]
    Io {
        origin: String,
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Supplies the descriptors found at a module or application location.
pub trait DescriptorSource: Send + Sync {
    /// `Ok(None)` if the location carries no such descriptor.
    fn parse(&self, location: &Url, name: DescriptorName)
    -> Result<Option<Descriptor>, DescriptorError>;
}

/// Reads descriptors from `META-INF/` below a `file:` location.
///
/// Other schemes carry no descriptors.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileDescriptorSource;

impl FileDescriptorSource {
    pub fn new() -> Self {
        Default::default()
    }
}

impl DescriptorSource for FileDescriptorSource {
    fn parse(
        &self,
        location: &Url,
        name: DescriptorName,
    ) -> Result<Option<Descriptor>, DescriptorError> {
        if location.scheme() != "file" {
            return Ok(None);
        }
        let Ok(root) = location.to_file_path() else {
            return Ok(None);
        };
        let path = root.join("META-INF").join(name.file_name());
        let Some(content) = read_optional(&path).map_err(|source| DescriptorError::Io {
            origin: location.to_string(),
            name: name.file_name(),
            source,
        })?
        else {
            return Ok(None);
        };
        tracing::debug!(%location, descriptor = %name, "read descriptor");
        name.parse(location.as_str(), &content).map(Some)
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn parses_module_descriptor() {
        let content = json!({
            "name": "orders",
            "components": [{
                "name": "Orders",
                "class": "com.acme.Orders",
                "type": "stateless",
                "refs": [{ "name": "jdbc/orders", "type": "DataSource" }],
                "units": [{ "name": "em", "unit": "orders" }],
                "properties": { "timeout": "5" }
            }]
        })
        .to_string();

        let Descriptor::Module(module) = DescriptorName::Module.parse("test", &content).unwrap()
        else {
            panic!("expected module descriptor");
        };
        assert_eq!(module.name.as_deref(), Some("orders"));
        let component = &module.components[0];
        assert_eq!(component.component_type, ComponentType::Stateless);
        assert_eq!(component.refs[0].type_hint.as_deref(), Some("DataSource"));
        assert_eq!(component.units[0].unit.as_deref(), Some("orders"));
    }

    #[test]
    fn unknown_fields_are_malformed() {
        let err = DescriptorName::Vendor
            .parse("test", r#"{ "nmae": "typo" }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Malformed { name: "vendor.json", .. }
        ));
    }

    #[test]
    fn file_source_reads_meta_inf() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("META-INF");
        fs::create_dir_all(&meta).unwrap();
        fs::write(
            meta.join("module-properties.json"),
            json!({ "pool.size": "10" }).to_string(),
        )
        .unwrap();
        let location = Url::from_directory_path(dir.path()).unwrap();
        let source = FileDescriptorSource::new();

        let parsed = source
            .parse(&location, DescriptorName::ModuleProperties)
            .unwrap();
        let Some(Descriptor::Properties(props)) = parsed else {
            panic!("expected module properties");
        };
        assert_eq!(props["pool.size"], "10");
        assert!(source.parse(&location, DescriptorName::Vendor).unwrap().is_none());
        assert!(
            source
                .parse(&Url::parse("memory://orders").unwrap(), DescriptorName::Module)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn file_names_round_trip() {
        for name in DescriptorName::MODULE_DESCRIPTORS {
            assert_eq!(DescriptorName::from_file_name(name.file_name()), Some(name));
        }
        assert_eq!(
            DescriptorName::from_file_name("META-INF/application-properties.json"),
            Some(DescriptorName::ApplicationProperties)
        );
        assert_eq!(DescriptorName::from_file_name("web.json"), None);
    }
}
