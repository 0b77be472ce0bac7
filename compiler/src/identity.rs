//! Stable names for modules and the application.
//!
//! A module is named by the first usable candidate, in order: its explicit name, the
//! vendor descriptor name, the standard descriptor name, the last segment of its URI,
//! then its file location with build-output directories stripped. A module with none
//! of these gets `<kind>-<hash>`, derived from its slot so reruns agree.

use std::hash::{DefaultHasher, Hash, Hasher};

use keel_graph::{AppGraph, Identity, Module, ModuleId, ModuleKind};
use url::Url;

/// Directory names that hold build output rather than name a project.
pub const BUILD_DIRS: [&str; 6] = ["classes", "target", "build", "bin", "dist", "test-classes"];

pub const ARCHIVE_SUFFIXES: [&str; 6] = [".jar", ".war", ".ear", ".rar", ".zip", ".unpacked"];

/// Suffix appended to the source module's identity for a generated client view.
pub const CLIENT_SUFFIX: &str = ".client";

/// True for names that cannot serve as an identity: blank, or an unexpanded `${...}`.
pub fn is_placeholder(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return true;
    }
    name.find("${")
        .is_some_and(|start| name[start + 2..].contains('}'))
}

fn usable(name: &str) -> Option<String> {
    (!is_placeholder(name)).then(|| name.trim().to_string())
}

pub fn strip_archive_suffix(name: &str) -> &str {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(name)
}

/// Name derived from a location, skipping trailing build-output directories.
///
/// `.../project/target/classes`, `.../project/build/classes/main` and
/// `.../project/build/classes/java/main` all yield `project`.
pub fn name_from_location(location: &Url) -> Option<String> {
    let mut segments: Vec<&str> = location
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .collect();

    loop {
        let len = segments.len();
        let Some(&last) = segments.last() else {
            return None;
        };
        if BUILD_DIRS.contains(&last) {
            segments.pop();
            continue;
        }
        if matches!(last, "main" | "test") {
            // gradle: build/classes/main or build/classes/<lang>/main
            if len >= 2 && segments[len - 2] == "classes" {
                segments.pop();
                continue;
            }
            if len >= 4 && segments[len - 3] == "classes" && segments[len - 4] == "build" {
                segments.truncate(len - 2);
                continue;
            }
        }
        break;
    }

    let name = strip_archive_suffix(segments.last()?);
    usable(name)
}

fn name_from_uri(uri: &str) -> Option<String> {
    let last = uri
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(uri);
    usable(strip_archive_suffix(last))
}

/// First usable candidate name for `module`, if any.
pub fn candidate(module: &Module) -> Option<String> {
    let descriptors = &module.descriptors;
    module
        .explicit_name
        .as_deref()
        .and_then(usable)
        .or_else(|| descriptors.vendor_name.as_deref().and_then(usable))
        .or_else(|| descriptors.standard_name.as_deref().and_then(usable))
        .or_else(|| module.uri.as_deref().and_then(name_from_uri))
        .or_else(|| module.location.as_ref().and_then(name_from_location))
}

/// `<kind>-<hash>`, stable for a given slot.
pub fn fallback(kind: ModuleKind, id: ModuleId) -> String {
    let mut hasher = DefaultHasher::new();
    kind.as_str().hash(&mut hasher);
    id.0.hash(&mut hasher);
    format!("{kind}-{:08x}", hasher.finish() as u32)
}

/// Assign `module` an identity unless it already has one; returns the identity.
pub fn assign(module: &mut Module) -> Identity {
    if let Some(identity) = &module.identity {
        return identity.clone();
    }
    let name = candidate(module).unwrap_or_else(|| fallback(module.kind, module.id));
    let identity = Identity::from(name);
    module.identity = Some(identity.clone());
    identity
}

/// Assign the application identity unless already set.
///
/// A standalone module deployed without an application wrapper lends it its own name.
pub fn assign_application(graph: &mut AppGraph) -> Identity {
    if let Some(identity) = &graph.identity {
        return identity.clone();
    }
    let name = graph
        .explicit_name
        .as_deref()
        .and_then(usable)
        .or_else(|| graph.location.as_ref().and_then(name_from_location))
        .or_else(|| {
            let mut live = graph.modules_iter().filter(|(_, m)| !m.generated);
            match (live.next(), live.next()) {
                (Some((_, module)), None) if !graph.packaged => {
                    module.identity.as_ref().map(ToString::to_string)
                }
                _ => None,
            }
        })
        .unwrap_or_else(|| "application".to_string());
    let identity = Identity::from(name);
    graph.identity = Some(identity.clone());
    identity
}

/// Name of a generated client view of `source`.
pub fn client_identity(source: &Identity) -> Identity {
    Identity::from(format!("{source}{CLIENT_SUFFIX}"))
}
