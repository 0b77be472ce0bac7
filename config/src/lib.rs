mod env;
mod error;
mod options;
mod scope;
mod trusted;

pub use env::{
    PROPERTY_ENV_PREFIX, env_var_for_key, env_var_to_key, scope_from_env, scope_from_vars,
};
pub use error::{ConfigError, Result};
pub use options::{DEFAULT_DEPLOYMENT_ID_FORMAT, DEPLOYMENT_ID_FORMAT_KEY, DeployOptions};
pub use scope::{
    Merged, OverrideEvent, OverrideKind, PropertyMap, ScopeLevel, Scopes, apply_overrides,
    effective_for, merge,
};
pub use trusted::{TRUSTED_PREFIXES, extract_trusted, is_trusted_key};
