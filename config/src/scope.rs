use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat key/value property space. Keys are dotted (`db.url`), values are raw strings.
pub type PropertyMap = BTreeMap<String, String>;

/// Where a layer of properties comes from. Later variants take precedence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    System,
    Deployment,
    Application,
    Module,
    Component,
    /// Trusted override namespace; wins regardless of target.
    Trusted,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::System => "system",
            ScopeLevel::Deployment => "deployment",
            ScopeLevel::Application => "application",
            ScopeLevel::Module => "module",
            ScopeLevel::Component => "component",
            ScopeLevel::Trusted => "trusted",
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    Added,
    Overridden,
}

/// One key written into a target while merging or applying overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideEvent {
    pub target: String,
    pub key: String,
    pub kind: OverrideKind,
    pub level: ScopeLevel,
    pub previous: Option<String>,
    pub value: String,
}

impl OverrideEvent {
    /// True if this event replaced an earlier, different value.
    pub fn changed_value(&self) -> bool {
        self.kind == OverrideKind::Overridden
            && self.previous.as_deref() != Some(self.value.as_str())
    }
}

/// An ordered list of borrowed, immutable property layers.
///
/// Layers are sorted by [`ScopeLevel`] before merging; layers with the same level keep
/// insertion order, so a later push of the same level wins.
#[derive(Clone, Debug, Default)]
pub struct Scopes<'a> {
    layers: Vec<(ScopeLevel, &'a PropertyMap)>,
}

impl<'a> Scopes<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, level: ScopeLevel, properties: &'a PropertyMap) -> Self {
        self.push(level, properties);
        self
    }

    pub fn push(&mut self, level: ScopeLevel, properties: &'a PropertyMap) {
        self.layers.push((level, properties));
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|(_, props)| props.is_empty())
    }

    fn ordered(&self) -> Vec<(ScopeLevel, &'a PropertyMap)> {
        let mut layers = self.layers.clone();
        layers.sort_by_key(|(level, _)| *level);
        layers
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Merged {
    pub effective: PropertyMap,
    /// Keys written while layering scopes, including trusted reapplication.
    pub events: Vec<OverrideEvent>,
    /// Keys written by `"<target>."` overrides.
    pub overrides: Vec<OverrideEvent>,
}

/// Merge `scopes` lowest to highest precedence into one flat map.
///
/// A key already present from a lower layer is reported as [`OverrideKind::Overridden`],
/// even when the value is unchanged; only the first layer to define a key reports
/// [`OverrideKind::Added`].
pub fn merge(target: &str, scopes: &Scopes<'_>) -> Merged {
    let mut out = Merged::default();
    for (level, layer) in scopes.ordered() {
        for (key, value) in layer {
            let previous = out.effective.insert(key.clone(), value.clone());
            let kind = if previous.is_some() {
                OverrideKind::Overridden
            } else {
                OverrideKind::Added
            };
            log_override(target, key, kind, value);
            out.events.push(OverrideEvent {
                target: target.to_string(),
                key: key.clone(),
                kind,
                level,
                previous,
                value: value.clone(),
            });
        }
    }
    out
}

/// Copy every `"<target>."`-prefixed key of `all` into `target_props`, prefix stripped.
pub fn apply_overrides(
    target: &str,
    level: ScopeLevel,
    all: &PropertyMap,
    target_props: &mut PropertyMap,
) -> Vec<OverrideEvent> {
    let prefix = format!("{target}.");
    let mut events = Vec::new();
    for (key, value) in all.range(prefix.clone()..) {
        let Some(name) = key.strip_prefix(&prefix) else {
            break;
        };
        if name.is_empty() {
            continue;
        }
        let previous = target_props.insert(name.to_string(), value.clone());
        let kind = if previous.is_some() {
            OverrideKind::Overridden
        } else {
            OverrideKind::Added
        };
        log_override(target, name, kind, value);
        events.push(OverrideEvent {
            target: target.to_string(),
            key: name.to_string(),
            kind,
            level,
            previous,
            value: value.clone(),
        });
    }
    events
}

/// Merge `scopes` and then apply the `"<target>."` overrides found in the merged result.
///
/// Trusted layers are reapplied after the target overrides so they always win.
pub fn effective_for(target: &str, scopes: &Scopes<'_>) -> Merged {
    let mut merged = merge(target, scopes);
    let flat = merged.effective.clone();
    let level = scopes
        .ordered()
        .iter()
        .map(|(level, _)| *level)
        .filter(|level| *level != ScopeLevel::Trusted)
        .max()
        .unwrap_or(ScopeLevel::System);
    merged.overrides = apply_overrides(target, level, &flat, &mut merged.effective);

    for (level, layer) in scopes.ordered() {
        if level != ScopeLevel::Trusted {
            continue;
        }
        for (key, value) in layer {
            let previous = merged.effective.insert(key.clone(), value.clone());
            if previous.as_deref() != Some(value.as_str()) {
                let kind = if previous.is_some() {
                    OverrideKind::Overridden
                } else {
                    OverrideKind::Added
                };
                log_override(target, key, kind, value);
                merged.events.push(OverrideEvent {
                    target: target.to_string(),
                    key: key.clone(),
                    kind,
                    level,
                    previous,
                    value: value.clone(),
                });
            }
        }
    }
    merged
}

fn log_override(target: &str, key: &str, kind: OverrideKind, value: &str) {
    match kind {
        OverrideKind::Overridden => {
            tracing::info!(owner = %target, %key, %value, "overriding property");
        }
        OverrideKind::Added => {
            tracing::debug!(owner = %target, %key, %value, "adding property");
        }
    }
}
