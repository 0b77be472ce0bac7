use crate::{ConfigError, PropertyMap, Result};

pub const PROPERTY_ENV_PREFIX: &str = "KEEL_PROP_";

/// Environment variable carrying property `key`: `db.max_pool` is `KEEL_PROP_DB__MAX_POOL`.
pub fn env_var_for_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(ConfigError::key(key, "key cannot be empty"));
    }
    let mut segs = Vec::new();
    for seg in key.split('.') {
        if seg.is_empty() {
            return Err(ConfigError::key(key, "empty segment"));
        }
        if seg.contains("__") || !seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::key(
                key,
                format!("segment {seg:?} must be ascii alphanumeric or '_' without '__'"),
            ));
        }
        segs.push(seg.to_ascii_uppercase());
    }
    Ok(format!("{}{}", PROPERTY_ENV_PREFIX, segs.join("__")))
}

pub fn env_var_to_key(var: &str) -> Result<String> {
    let rest = var
        .strip_prefix(PROPERTY_ENV_PREFIX)
        .ok_or_else(|| ConfigError::env_var(var, "not a KEEL_PROP_* variable"))?;
    if rest.is_empty() {
        return Err(ConfigError::env_var(var, "missing key suffix"));
    }

    let segs = rest
        .split("__")
        .map(|s| s.to_ascii_lowercase())
        .collect::<Vec<_>>();
    if segs.iter().any(String::is_empty) {
        return Err(ConfigError::env_var(var, "empty key segment"));
    }
    Ok(segs.join("."))
}

/// Build a property scope from `KEEL_PROP_*` variables; other variables are ignored.
///
/// Empty values are skipped so an exported-but-empty variable does not mask a lower scope.
pub fn scope_from_vars<I, K, V>(vars: I) -> Result<PropertyMap>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut out = PropertyMap::new();
    for (name, value) in vars {
        let name = name.as_ref();
        if !name.starts_with(PROPERTY_ENV_PREFIX) {
            continue;
        }
        let value = value.into();
        if value.is_empty() {
            continue;
        }
        out.insert(env_var_to_key(name)?, value);
    }
    Ok(out)
}

/// [`scope_from_vars`] over the current process environment.
pub fn scope_from_env() -> Result<PropertyMap> {
    scope_from_vars(std::env::vars())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_round_trips_dotted_keys() {
        let var = env_var_for_key("db.max_pool").unwrap();
        assert_eq!(var, "KEEL_PROP_DB__MAX_POOL");
        assert_eq!(env_var_to_key(&var).unwrap(), "db.max_pool");
    }

    #[test]
    fn scope_skips_foreign_and_empty_vars() {
        let scope = scope_from_vars([
            ("KEEL_PROP_DB__URL", "postgres://db"),
            ("KEEL_PROP_DB__POOL", ""),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(
            scope,
            PropertyMap::from([("db.url".to_string(), "postgres://db".to_string())])
        );
    }

    #[test]
    fn empty_segment_is_rejected() {
        let err = env_var_to_key("KEEL_PROP_DB____URL").unwrap_err();
        assert!(err.to_string().contains("empty key segment"), "{err}");
        assert!(matches!(
            env_var_for_key("db..url"),
            Err(ConfigError::InvalidKey { .. })
        ));
        assert!(matches!(
            env_var_to_key("PATH"),
            Err(ConfigError::InvalidEnvVar { .. })
        ));
    }
}
