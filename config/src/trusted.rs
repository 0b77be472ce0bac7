use crate::PropertyMap;

/// Property namespaces whose entries apply to the whole deployment, above every other scope.
pub const TRUSTED_PREFIXES: [&str; 2] = ["keel.override.", "deployment.override."];

/// Collect the trusted entries of `properties`, prefix stripped.
///
/// When both namespaces set the same key, the one listed later in [`TRUSTED_PREFIXES`] wins.
pub fn extract_trusted(properties: &PropertyMap) -> PropertyMap {
    let mut out = PropertyMap::new();
    for prefix in TRUSTED_PREFIXES {
        for (key, value) in properties.range(prefix.to_string()..) {
            let Some(name) = key.strip_prefix(prefix) else {
                break;
            };
            if name.is_empty() {
                continue;
            }
            out.insert(name.to_string(), value.clone());
        }
    }
    out
}

pub fn is_trusted_key(key: &str) -> bool {
    TRUSTED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}
