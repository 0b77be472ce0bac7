//! Effective property scopes for the application, its modules and their components.
//!
//! Each level layers its own declared properties over the level above and re-applies the
//! trusted overrides on top. `"<target>."` keys found anywhere in the merged view are
//! folded into the target they name.

use keel_config::{Merged, ScopeLevel, Scopes, effective_for};
use keel_graph::{AppGraph, ValidationContext};

use super::{Stage, StageContext, StageError};

/// Warn about every key whose value a higher scope or a `"<target>."` override replaced.
fn warn_overridden(validation: &mut ValidationContext, target: &str, merged: &Merged) {
    let replaced = merged
        .events
        .iter()
        .chain(&merged.overrides)
        .filter(|e| e.changed_value());
    for event in replaced {
        validation.warn(
            target,
            "property.overridden",
            format!(
                "`{}` overridden by {} scope: `{}` -> `{}`",
                event.key,
                event.level,
                event.previous.as_deref().unwrap_or_default(),
                event.value
            ),
        );
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApplicationProperties;

impl Stage for ApplicationProperties {
    fn name(&self) -> &'static str {
        "application-properties"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let target = graph.display_name();
        let scopes = Scopes::new()
            .with(ScopeLevel::System, &graph.system_properties)
            .with(ScopeLevel::Deployment, &graph.deployment_properties)
            .with(ScopeLevel::Application, &graph.properties)
            .with(ScopeLevel::Trusted, &graph.trusted_properties);
        let merged = effective_for(&target, &scopes);
        warn_overridden(&mut graph.validation, &target, &merged);
        graph.effective_properties = merged.effective;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ModuleProperties;

impl Stage for ModuleProperties {
    fn name(&self) -> &'static str {
        "module-properties"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let application = &graph.effective_properties;
        let trusted = &graph.trusted_properties;
        for module in graph.modules.iter_mut().flatten() {
            let target = module.display_name();
            let scopes = Scopes::new()
                .with(ScopeLevel::Application, application)
                .with(ScopeLevel::Module, &module.properties)
                .with(ScopeLevel::Trusted, trusted);
            let merged = effective_for(&target, &scopes);
            warn_overridden(&mut module.validation, &target, &merged);
            module.effective_properties = merged.effective;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentProperties;

impl Stage for ComponentProperties {
    fn name(&self) -> &'static str {
        "component-properties"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let trusted = &graph.trusted_properties;
        for module in graph.modules.iter_mut().flatten() {
            for component in module.components.values_mut() {
                let scopes = Scopes::new()
                    .with(ScopeLevel::Module, &module.effective_properties)
                    .with(ScopeLevel::Component, &component.properties)
                    .with(ScopeLevel::Trusted, trusted);
                let merged = effective_for(&component.name, &scopes);
                warn_overridden(&mut module.validation, &component.name, &merged);
                component.effective_properties = merged.effective;
            }
        }
        Ok(())
    }
}
