use serde::{Deserialize, Serialize};

use crate::{PropertyMap, Result, scope_from_env, scope_from_vars};

pub const DEFAULT_DEPLOYMENT_ID_FORMAT: &str = "{componentName}";

/// Property key consulted (module scope first, then application) for the deployment id format.
pub const DEPLOYMENT_ID_FORMAT_KEY: &str = "deployment-id.format";

/// Options threaded through one deployment attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeployOptions {
    /// Create resources from provider templates when no declared resource matches.
    pub auto_create_resources: bool,
    /// Create containers from provider templates when no declared container matches.
    pub auto_create_containers: bool,
    pub deployment_id_format: String,
    /// Upper bound on concurrently running module scans.
    pub scan_concurrency: usize,
    /// Process-wide properties (lowest precedence scope).
    pub system_properties: PropertyMap,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            auto_create_resources: true,
            auto_create_containers: true,
            deployment_id_format: DEFAULT_DEPLOYMENT_ID_FORMAT.to_string(),
            scan_concurrency: 8,
            system_properties: PropertyMap::new(),
        }
    }
}

impl DeployOptions {
    /// Options for resolving without creating anything: every missing target is a failure.
    pub fn offline() -> Self {
        Self {
            auto_create_resources: false,
            auto_create_containers: false,
            ..Self::default()
        }
    }

    /// Layer `KEEL_PROP_*` variables under the system properties; explicit entries win.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in scope_from_vars(vars)? {
            self.system_properties.entry(key).or_insert(value);
        }
        Ok(self)
    }

    /// Default options with the process environment as system properties.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            system_properties: scope_from_env()?,
            ..Self::default()
        })
    }
}
