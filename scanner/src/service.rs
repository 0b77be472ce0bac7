use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt as _;
use keel_graph::{AppGraph, ClassIndex, ModuleId, ScanSlot};
use tokio::sync::{OnceCell, Semaphore};

use crate::{ScanCache, ScanError, ScanKey, ScanLease, ScanRequest, Scanner};

/// Materializes scan results for a whole graph before the pipeline runs.
///
/// Modules are scanned concurrently up to `max_concurrency`. Identical classpaths are
/// scanned once per run and served from the shared [`ScanCache`] across runs.
#[derive(Clone)]
pub struct ScanService {
    scanner: Arc<dyn Scanner>,
    cache: ScanCache,
    max_concurrency: usize,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("cache_entries", &self.cache.len())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct ScanRun {
    scanner: Arc<dyn Scanner>,
    cache: ScanCache,
    sem: Arc<Semaphore>,
    inflight: Arc<DashMap<ScanKey, Arc<OnceCell<Arc<ClassIndex>>>>>,
}

struct ScanJob {
    module: ModuleId,
    key: ScanKey,
    request: ScanRequest,
}

impl ScanService {
    pub fn new(scanner: Arc<dyn Scanner>, cache: ScanCache, max_concurrency: usize) -> Self {
        Self {
            scanner,
            cache,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    /// Fill the scan slot of every unscanned, non-generated module.
    ///
    /// On success the returned lease holds one cache reference per distinct classpath for
    /// as long as the deployment keeps it. On failure no references are retained.
    pub async fn scan_graph(&self, graph: &mut AppGraph) -> Result<ScanLease, ScanError> {
        let jobs: Vec<ScanJob> = graph
            .modules_iter()
            .filter(|(_, m)| !m.generated && matches!(m.scan, ScanSlot::Unscanned))
            .map(|(id, m)| {
                let request = ScanRequest {
                    module: m.display_name(),
                    classpath: m.classpath.clone(),
                    loader: m.loader,
                };
                ScanJob {
                    module: id,
                    key: request.key(),
                    request,
                }
            })
            .collect();

        let run = ScanRun {
            scanner: Arc::clone(&self.scanner),
            cache: self.cache.clone(),
            sem: Arc::new(Semaphore::new(self.max_concurrency)),
            inflight: Arc::new(DashMap::new()),
        };

        let results: Vec<_> = futures::stream::iter(jobs.into_iter().map(|job| {
            let run = run.clone();
            async move {
                let index = scan_module(&run, job.key, job.request).await;
                (job.module, index)
            }
        }))
        .buffer_unordered(self.max_concurrency)
        .collect()
        .await;

        // Every distinct key that reached the cache took exactly one reference.
        let mut lease = ScanLease::new(self.cache.clone());
        for entry in run.inflight.iter() {
            if entry.value().initialized() {
                lease.push(*entry.key());
            }
        }

        let mut first_error = None;
        for (module, result) in results {
            match result {
                Ok(index) => graph.module_mut(module).scan = ScanSlot::Owned(index),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(lease),
        }
    }
}

async fn scan_module(
    run: &ScanRun,
    key: ScanKey,
    request: ScanRequest,
) -> Result<Arc<ClassIndex>, ScanError> {
    let cell = run
        .inflight
        .entry(key)
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();

    let index = cell
        .get_or_try_init(|| async { load(run, key, request).await })
        .await?;
    Ok(Arc::clone(index))
}

async fn load(run: &ScanRun, key: ScanKey, request: ScanRequest) -> Result<Arc<ClassIndex>, ScanError> {
    if let Some(index) = run.cache.acquire(&key) {
        tracing::debug!(module = %request.module, %key, "scan cache hit");
        return Ok(index);
    }

    let _permit = run.sem.acquire().await.expect("semaphore closed");

    let module = request.module.clone();
    let scanner = Arc::clone(&run.scanner);
    let index = tokio::task::spawn_blocking(move || scanner.scan(&request))
        .await
        .map_err(|err| ScanError::Worker {
            module: module.clone(),
            message: err.to_string(),
        })??;

    tracing::debug!(%module, %key, classes = index.len(), "scanned module");
    Ok(run.cache.insert(key, index))
}
