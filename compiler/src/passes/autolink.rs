use keel_graph::{AppGraph, ValidationContext};

use super::{Stage, StageContext, StageError};
use crate::linker::{self, LinkError, LinkPolicy, Linked};

/// Binds every component to a container, then every reference to a resource, then the
/// data sources of every data-access unit.
///
/// Failures to link are recorded against the component (or module) that holds the
/// reference; unit data sources report against the unit on its owner. The stage itself
/// never aborts.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoLink;

impl Stage for AutoLink {
    fn name(&self) -> &'static str {
        "auto-link"
    }

    fn apply(&self, graph: &mut AppGraph, cx: &StageContext<'_>) -> Result<(), StageError> {
        let mut resources = std::mem::take(&mut graph.resources);
        let mut containers = std::mem::take(&mut graph.containers);
        let overrides = &graph.effective_properties;
        let resource_policy = LinkPolicy {
            auto_create: cx.options.auto_create_resources,
            overrides,
        };
        let container_policy = LinkPolicy {
            auto_create: cx.options.auto_create_containers,
            overrides,
        };

        for module in graph.modules.iter_mut().flatten() {
            let module_name = module.display_name();
            let mut outcomes: Vec<(String, Result<Linked, LinkError>)> = Vec::new();

            for reference in module.refs.iter_mut().filter(|r| r.binding.is_none()) {
                let result = linker::resolve(
                    reference,
                    &module_name,
                    &mut resources,
                    cx.catalog,
                    resource_policy,
                );
                if let Ok(linked) = &result {
                    reference.binding = Some(linked.binding.clone());
                }
                outcomes.push((module_name.clone(), result));
            }

            for component in module.components.values_mut() {
                let owner = format!("{module_name}/{}", component.name);
                let result = linker::link_container(
                    component,
                    &owner,
                    &mut containers,
                    cx.catalog,
                    container_policy,
                );
                if let Ok(linked) = &result {
                    component.container_id = Some(linked.binding.target.clone());
                }
                outcomes.push((component.name.clone(), result));

                for reference in component.refs.iter_mut().filter(|r| r.binding.is_none()) {
                    let result = linker::resolve(
                        reference,
                        &owner,
                        &mut resources,
                        cx.catalog,
                        resource_policy,
                    );
                    if let Ok(linked) = &result {
                        reference.binding = Some(linked.binding.clone());
                    }
                    outcomes.push((component.name.clone(), result));
                }
            }

            for (target, outcome) in outcomes {
                record(&mut module.validation, target, outcome);
            }
        }

        let mut unit_outcomes = Vec::new();
        for unit in &mut graph.shared_units {
            let (owner, id, name) = (unit.owner, unit.id(), unit.name.clone());
            for reference in unit.data_sources_mut().filter(|r| r.binding.is_none()) {
                let result =
                    linker::resolve(reference, &id, &mut resources, cx.catalog, resource_policy);
                if let Ok(linked) = &result {
                    reference.binding = Some(linked.binding.clone());
                }
                unit_outcomes.push((owner, name.clone(), result));
            }
        }
        for (owner, target, outcome) in unit_outcomes {
            record(graph.unit_validation_mut(owner), target, outcome);
        }

        graph.resources = resources;
        graph.containers = containers;
        Ok(())
    }
}

fn record(validation: &mut ValidationContext, target: String, outcome: Result<Linked, LinkError>) {
    match outcome {
        Ok(linked) if linked.from_default => validation.warn(
            target,
            "link.default-provider",
            format!(
                "bound to `{}`, created from a default provider; it likely needs configuration",
                linked.binding.target
            ),
        ),
        Ok(_) => {}
        Err(err) => validation.fail(target, err.key(), err.to_string()),
    }
}
