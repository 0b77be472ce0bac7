//! Resolution of a deployment graph into a concrete, consistent configuration.
//!
//! [`Deployer::deploy`] scans every module, then runs the fixed [`Pipeline`] of stages over
//! the graph. Rule violations end up as diagnostics on the returned graph; only scanning
//! problems and unreadable descriptors abort.

use std::sync::Arc;

use keel_config::{ConfigError, DeployOptions};
use keel_graph::{AppGraph, Diagnostics, ResolvedGraphIr, ResolvedGraphIrError};
use keel_scanner::{
    DescriptorSource, FileDescriptorSource, IndexFileScanner, ScanCache, ScanError, ScanLease,
    ScanService, Scanner,
};
use miette::Diagnostic;
use url::Url;

pub mod catalog;
pub mod identity;
pub mod linker;
pub mod ownership;
pub mod passes;

pub use catalog::{ProviderCatalog, ProviderKind, ProviderTemplate, StaticCatalog};
pub use passes::{Pipeline, Stage, StageContext, StageError};

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum DeployError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scan(#[from] ScanError),
    #[error(
        "stage `{stage}` failed{}",
        .module.as_ref().map(|m| format!(" for {m}")).unwrap_or_default()
    )]
    #[diagnostic(code(keel::deploy::stage))]
    Stage {
        stage: &'static str,
        module: Option<String>,
        #[source]
        source: StageError,
    },
}

/// A resolved graph together with everything recorded while resolving it.
#[derive(Debug)]
pub struct DeployOutput {
    pub graph: AppGraph,
    pub diagnostics: Diagnostics,
    /// Keeps this deployment's scan results cached until dropped.
    pub scans: ScanLease,
}

impl DeployOutput {
    pub fn is_deployable(&self) -> bool {
        self.diagnostics.is_deployable()
    }

    pub fn resolved_ir(&self) -> Result<ResolvedGraphIr, ResolvedGraphIrError> {
        ResolvedGraphIr::try_from(&self.graph)
    }
}

pub struct Deployer {
    scans: ScanService,
    descriptors: Arc<dyn DescriptorSource>,
    catalog: Arc<dyn ProviderCatalog>,
    pipeline: Pipeline,
    options: DeployOptions,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("scans", &self.scans)
            .field("stages", &self.pipeline.stage_names().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Deployer {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        descriptors: Arc<dyn DescriptorSource>,
        catalog: Arc<dyn ProviderCatalog>,
        options: DeployOptions,
    ) -> Self {
        Self::with_cache(scanner, ScanCache::new(), descriptors, catalog, options)
    }

    /// Share `cache` with other deployers so identical classpaths are scanned once.
    pub fn with_cache(
        scanner: Arc<dyn Scanner>,
        cache: ScanCache,
        descriptors: Arc<dyn DescriptorSource>,
        catalog: Arc<dyn ProviderCatalog>,
        options: DeployOptions,
    ) -> Self {
        Self {
            scans: ScanService::new(scanner, cache, options.scan_concurrency),
            descriptors,
            catalog,
            pipeline: Pipeline::standard(),
            options,
        }
    }

    /// Class indexes and descriptors read from `file:` locations, built-in providers.
    pub fn file_based(options: DeployOptions) -> Self {
        Self::new(
            Arc::new(IndexFileScanner::new()),
            Arc::new(FileDescriptorSource::new()),
            Arc::new(StaticCatalog::with_defaults()),
            options,
        )
    }

    /// [`Deployer::file_based`] with `KEEL_PROP_*` variables layered under `options`.
    pub fn file_based_with_env(options: DeployOptions) -> Result<Self, DeployError> {
        Ok(Self::file_based(options.with_env_vars(std::env::vars())?))
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn scan_cache(&self) -> &ScanCache {
        self.scans.cache()
    }

    /// Forget the cached scan of `classpath` so the next deployment rescans it.
    pub fn invalidate(&self, classpath: &[Url]) -> bool {
        self.scans.cache().invalidate_classpath(classpath)
    }

    #[tracing::instrument(skip_all, fields(application = %graph.display_name()))]
    pub async fn deploy(&self, mut graph: AppGraph) -> Result<DeployOutput, DeployError> {
        for (key, value) in &self.options.system_properties {
            graph
                .system_properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let scans = self.scans.scan_graph(&mut graph).await?;
        let cx = StageContext {
            options: &self.options,
            descriptors: self.descriptors.as_ref(),
            catalog: self.catalog.as_ref(),
        };
        let graph = self.pipeline.run(graph, &cx)?;
        let diagnostics = graph.diagnostics();
        if diagnostics.is_deployable() {
            tracing::info!(warnings = diagnostics.warnings.len(), "graph resolved");
        } else {
            tracing::warn!(
                errors = diagnostics.errors.len(),
                failures = diagnostics.failures.len(),
                "graph resolved with failures; deployment refused"
            );
        }
        Ok(DeployOutput {
            graph,
            diagnostics,
            scans,
        })
    }
}
