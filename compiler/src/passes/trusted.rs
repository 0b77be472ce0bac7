use keel_config::extract_trusted;
use keel_graph::AppGraph;

use super::{Stage, StageContext, StageError};

/// Lifts trusted system properties into the deployment-wide scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustedOverrides;

impl Stage for TrustedOverrides {
    fn name(&self) -> &'static str {
        "trusted-overrides"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let trusted = extract_trusted(&graph.system_properties);
        if trusted.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = trusted.len(), "applying trusted overrides");
        for (key, value) in &trusted {
            graph.deployment_properties.insert(key.clone(), value.clone());
        }
        graph.trusted_properties.extend(trusted);
        Ok(())
    }
}
