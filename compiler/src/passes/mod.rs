//! The fixed resolution pipeline.
//!
//! Stages run in a fixed order over one graph. Each stage records rule violations as
//! diagnostics on the graph and only returns an error for problems that make the rest of
//! the run meaningless.

use keel_config::DeployOptions;
use keel_graph::AppGraph;
use keel_scanner::{DescriptorError, DescriptorSource};
use miette::Diagnostic;
use thiserror::Error;

use crate::{DeployError, catalog::ProviderCatalog};

pub mod autolink;
pub mod clients;
pub mod deployments;
pub mod descriptors;
pub mod discover;
#[cfg(test)]
mod fixture;
pub mod identities;
pub mod properties;
pub mod trusted;
pub mod units;
pub mod validate;

pub use autolink::AutoLink;
pub use clients::{AddGeneratedClients, PruneGeneratedClients};
pub use deployments::InitDeployments;
pub use descriptors::ReadDescriptors;
pub use discover::DiscoverComponents;
pub use identities::AssignIdentities;
pub use properties::{ApplicationProperties, ComponentProperties, ModuleProperties};
pub use trusted::TrustedOverrides;
pub use units::DisambiguateSharedUnits;
pub use validate::ValidateResolution;

/// Collaborators and options shared by every stage of one run.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub options: &'a DeployOptions,
    pub descriptors: &'a dyn DescriptorSource,
    pub catalog: &'a dyn ProviderCatalog,
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum StageError {
    /// The stage did not apply; recorded as a warning and the run continues.
    #[error("skipped: {reason}")]
    #[diagnostic(code(keel::stage::skipped))]
    Skip { reason: String },
    #[error("unreadable descriptor")]
    #[diagnostic(code(keel::stage::descriptor))]
    Descriptor {
        module: String,
        #[source]
        source: DescriptorError,
    },
    #[error("identity `{identity}` is used by more than one module")]
    #[diagnostic(
        code(keel::stage::duplicate_identity),
        help("give one of the modules a distinct explicit name")
    )]
    DuplicateIdentity { module: String, identity: String },
    #[error("{module} has no identity")]
    #[diagnostic(code(keel::stage::missing_identity))]
    MissingIdentity { module: String },
    #[error("{message}")]
    #[diagnostic(code(keel::stage::failed))]
    Failed {
        module: Option<String>,
        message: String,
    },
}

impl StageError {
    pub fn skip(reason: impl Into<String>) -> Self {
        StageError::Skip {
            reason: reason.into(),
        }
    }

    /// Module the error is about, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            StageError::Skip { .. } => None,
            StageError::Descriptor { module, .. }
            | StageError::DuplicateIdentity { module, .. }
            | StageError::MissingIdentity { module } => Some(module),
            StageError::Failed { module, .. } => module.as_deref(),
        }
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, graph: &mut AppGraph, cx: &StageContext<'_>) -> Result<(), StageError>;
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stage, in resolution order.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.push(TrustedOverrides);
        pipeline.push(AddGeneratedClients);
        pipeline.push(ReadDescriptors);
        pipeline.push(AssignIdentities);
        pipeline.push(DiscoverComponents);
        pipeline.push(PruneGeneratedClients);
        pipeline.push(DisambiguateSharedUnits);
        pipeline.push(ApplicationProperties);
        pipeline.push(ModuleProperties);
        pipeline.push(ComponentProperties);
        pipeline.push(InitDeployments);
        pipeline.push(AutoLink);
        pipeline.push(ValidateResolution);
        pipeline
    }

    pub fn push<S>(&mut self, stage: S)
    where
        S: Stage + 'static,
    {
        self.stages.push(Box::new(stage));
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    pub fn run(&self, mut graph: AppGraph, cx: &StageContext<'_>) -> Result<AppGraph, DeployError> {
        for stage in &self.stages {
            let name = stage.name();
            let _span = tracing::info_span!("stage", stage = name).entered();
            tracing::debug!("running stage");
            match stage.apply(&mut graph, cx) {
                Ok(()) => {}
                Err(StageError::Skip { reason }) => {
                    tracing::warn!(%reason, "stage skipped");
                    let target = graph.display_name();
                    graph
                        .validation
                        .warn(target, "stage.skipped", format!("{name}: {reason}"));
                }
                Err(source) => {
                    tracing::error!(error = %source, "stage aborted the deployment");
                    return Err(DeployError::Stage {
                        stage: name,
                        module: source.module().map(str::to_string),
                        source,
                    });
                }
            }
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests;
