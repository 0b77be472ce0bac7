use keel_graph::{AppGraph, ModuleId, UnitOwner};
use url::Url;

use super::{Stage, StageContext, StageError};
use crate::ownership::{UnitLinkError, link_unit, owner_of};

/// Settles which module owns each shared data-access unit, then links unit references.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisambiguateSharedUnits;

impl Stage for DisambiguateSharedUnits {
    fn name(&self) -> &'static str {
        "disambiguate-shared-units"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let siblings: Vec<(ModuleId, Url)> = graph
            .modules_iter()
            .filter(|(_, m)| !m.generated)
            .filter_map(|(id, m)| m.location.clone().map(|location| (id, location)))
            .collect();
        let live: Vec<ModuleId> = graph
            .modules_iter()
            .filter(|(_, m)| !m.generated)
            .map(|(id, _)| id)
            .collect();
        // A bare module deployed on its own owns everything it ships.
        let sole = match live.as_slice() {
            [id] if !graph.packaged => Some(*id),
            _ => None,
        };

        let sibling_refs: Vec<(ModuleId, &Url)> =
            siblings.iter().map(|(id, location)| (*id, location)).collect();
        let app_root = graph.location.clone();
        for unit in graph.shared_units.iter_mut().filter(|u| u.owner.is_none()) {
            let owner = match sole {
                Some(id) => UnitOwner::Module(id),
                None => owner_of(&unit.root, &sibling_refs, app_root.as_ref()),
            };
            tracing::debug!(unit = %unit.id(), ?owner, "assigned data-access unit");
            unit.owner = Some(owner);
        }

        let units = std::mem::take(&mut graph.shared_units);
        for (id, module) in graph.modules_iter_mut() {
            let mut failures = Vec::new();
            for component in module.components.values_mut() {
                for reference in component.unit_refs.iter_mut().filter(|r| r.resolved.is_none()) {
                    match link_unit(reference, id, &units) {
                        Ok(unit) => reference.resolved = Some(unit),
                        Err(err) => {
                            failures.push((component.name.clone(), reference.name.clone(), err));
                        }
                    }
                }
            }
            for (component, reference, err) in failures {
                let key = match err {
                    UnitLinkError::NotFound { .. } => "unit.unresolved",
                    UnitLinkError::Ambiguous { .. } => "unit.ambiguous",
                };
                module
                    .validation
                    .fail(component, key, format!("unit reference `{reference}`: {err}"));
            }
        }
        graph.shared_units = units;
        Ok(())
    }
}
