use miette::Diagnostic;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid property key {key:?}: {reason}")]
    #[diagnostic(
        code(keel::config::invalid_key),
        help("property keys are dot-separated segments of ascii letters, digits and `_`")
    )]
    InvalidKey { key: String, reason: String },
    #[error("invalid environment variable {var:?}: {reason}")]
    #[diagnostic(
        code(keel::config::invalid_env_var),
        help("property variables are named like KEEL_PROP_DB__URL for `db.url`")
    )]
    InvalidEnvVar { var: String, reason: String },
}

impl ConfigError {
    pub(crate) fn key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_var(var: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            var: var.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
