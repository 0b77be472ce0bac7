//! Ownership of shared data-access units and linking of unit references.

use keel_graph::{
    ModuleId, SharedUnit, UnitOwner, UnitRef,
    graph::{same_location, walk_up},
};
use url::Url;

/// Owner of a unit rooted at `unit_root`.
///
/// Walks up from the unit root toward `app_root`; the first sibling whose location equals
/// a visited location owns the unit. Nothing found below or at the application root
/// leaves the unit with the application.
pub fn owner_of(
    unit_root: &Url,
    siblings: &[(ModuleId, &Url)],
    app_root: Option<&Url>,
) -> UnitOwner {
    for visited in walk_up(unit_root) {
        if let Some((id, _)) = siblings
            .iter()
            .find(|(_, location)| same_location(location, &visited))
        {
            return UnitOwner::Module(*id);
        }
        if app_root.is_some_and(|root| same_location(root, &visited)) {
            break;
        }
    }
    UnitOwner::Application
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnitLinkError {
    #[error("no data-access unit named `{name}`")]
    NotFound { name: String },
    #[error("{count} data-access units named `{name}` are equally visible")]
    Ambiguous { name: String, count: usize },
}

/// Link `reference`, held by a component of `module`, to one of `units`; returns the unit id.
///
/// A named reference matches by unit name. An unnamed one tries the reference name and its
/// last path segment, then falls back to the only unit of the application.
pub fn link_unit(
    reference: &UnitRef,
    module: ModuleId,
    units: &[SharedUnit],
) -> Result<String, UnitLinkError> {
    let names: Vec<&str> = match reference.unit_name.as_deref() {
        Some(name) => vec![name],
        None => {
            let short = reference.name.rsplit('/').next().unwrap_or(&reference.name);
            vec![reference.name.as_str(), short]
        }
    };

    for name in &names {
        let matching: Vec<&SharedUnit> = units.iter().filter(|u| u.name == *name).collect();
        if matching.is_empty() {
            continue;
        }
        let owned_by = |owner: UnitOwner| {
            matching
                .iter()
                .copied()
                .filter(|u| u.owner == Some(owner))
                .collect::<Vec<_>>()
        };
        for tier in [
            owned_by(UnitOwner::Module(module)),
            owned_by(UnitOwner::Application),
            matching.clone(),
        ] {
            match tier.as_slice() {
                [] => continue,
                [unit] => return Ok(unit.id()),
                _ => {
                    return Err(UnitLinkError::Ambiguous {
                        name: name.to_string(),
                        count: tier.len(),
                    });
                }
            }
        }
    }

    if reference.unit_name.is_none()
        && let [only] = units
    {
        return Ok(only.id());
    }
    Err(UnitLinkError::NotFound {
        name: names[0].to_string(),
    })
}
