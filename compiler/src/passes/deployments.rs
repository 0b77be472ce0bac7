use std::collections::HashMap;

use keel_config::DEPLOYMENT_ID_FORMAT_KEY;
use keel_graph::AppGraph;

use super::{Stage, StageContext, StageError};

/// Values a deployment id format may refer to.
struct FormatInputs<'a> {
    app_id: &'a str,
    module_id: &'a str,
    component_name: &'a str,
    component_class: &'a str,
}

impl FormatInputs<'_> {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "appId" => Some(self.app_id),
            "moduleId" => Some(self.module_id),
            "componentName" => Some(self.component_name),
            "componentClass" => Some(self.component_class),
            "componentClass.simpleName" => Some(
                self.component_class
                    .rsplit('.')
                    .next()
                    .unwrap_or(self.component_class),
            ),
            _ => None,
        }
    }
}

/// Expand `{placeholder}`s in `format`. Unknown placeholders are kept verbatim and
/// returned alongside the result.
fn expand(format: &str, inputs: &FormatInputs<'_>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(format.len());
    let mut unknown = Vec::new();
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        // An unterminated `{` is copied through as text.
        let Some(end) = rest.find('}') else {
            break;
        };
        let key = &rest[1..end];
        match inputs.lookup(key) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str(&rest[..=end]);
                unknown.push(key.to_string());
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    (out, unknown)
}

/// Gives every component its deployment id.
///
/// An id set by a vendor descriptor is kept. Otherwise the format is taken from the
/// module's effective properties, which already include the application's, falling back
/// to the deployment options. Ids must be unique across the application.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitDeployments;

impl Stage for InitDeployments {
    fn name(&self) -> &'static str {
        "init-deployments"
    }

    fn apply(&self, graph: &mut AppGraph, cx: &StageContext<'_>) -> Result<(), StageError> {
        let app_id = graph.display_name();
        let mut seen: HashMap<String, String> = HashMap::new();

        for module in graph.modules.iter_mut().flatten() {
            if module.generated {
                continue;
            }
            let module_id = module.display_name();
            let format = module
                .effective_properties
                .get(DEPLOYMENT_ID_FORMAT_KEY)
                .cloned()
                .unwrap_or_else(|| cx.options.deployment_id_format.clone());

            let mut unknown = Vec::new();
            let mut duplicates = Vec::new();
            for component in module.components.values_mut() {
                if component.deployment_id.is_none() {
                    let inputs = FormatInputs {
                        app_id: &app_id,
                        module_id: &module_id,
                        component_name: &component.name,
                        component_class: &component.class_name,
                    };
                    let (deployment_id, missing) = expand(&format, &inputs);
                    unknown.extend(missing);
                    component.deployment_id = Some(deployment_id);
                }
                let Some(deployment_id) = component.deployment_id.clone() else {
                    continue;
                };
                match seen.get(&deployment_id) {
                    Some(owner) => {
                        duplicates.push((component.name.clone(), deployment_id, owner.clone()));
                    }
                    None => {
                        tracing::debug!(
                            module = %module_id,
                            component = %component.name,
                            %deployment_id,
                            "deployment id"
                        );
                        let owner = format!("{} in {module_id}", component.name);
                        seen.insert(deployment_id, owner);
                    }
                }
            }

            unknown.sort();
            unknown.dedup();
            if !unknown.is_empty() {
                module.validation.warn(
                    module_id.clone(),
                    "deployment.format",
                    format!("unknown placeholders in `{format}`: {}", unknown.join(", ")),
                );
            }
            for (component, deployment_id, owner) in duplicates {
                module.validation.fail(
                    component,
                    "deployment.duplicate-id",
                    format!("deployment id `{deployment_id}` is already used by {owner}"),
                );
            }
        }
        Ok(())
    }
}
