use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::metrics::METRICS;
use crate::schema::{AggregationRun, CollectionResult, CollectionTask, RunStatus};
use crate::sources::collector::SourceCollector;

/// One unit of submitted work: the task plus the collector that
/// executes it. Pairing them here keeps the orchestrator free of
/// registry lookups and lets tests inject collectors directly.
pub type CollectionJob = (Arc<dyn SourceCollector>, CollectionTask);

/// Process-local run id sequence.
static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Fans a collection run out across a bounded worker pool and merges
/// the partial results.
///
/// GUARANTEES:
/// - At most `pool_size` collector calls are in flight at once;
///   excess tasks queue on the pool rather than spawning unbounded
///   work.
/// - Every submitted task yields exactly one result, success or
///   error, never zero, never duplicated.
/// - A failing task never aborts its siblings.
/// - `run` returns only after every task has resolved.
///
/// NOT RESPONSIBLE FOR:
/// - Horizon semantics (collector responsibility)
/// - Artifact persistence or publishing (pipeline tail)
pub struct Orchestrator {
    pool_size: usize,
}

impl Orchestrator {
    pub fn new(pool_size: usize) -> Self {
        Self { pool_size: pool_size.max(1) }
    }

    /// Executes every job and returns the resolved run.
    ///
    /// The returned run is still `Running`; the pipeline tail decides
    /// between `Completed` and `Failed` once the artifact write has
    /// happened (or been skipped).
    ///
    /// An empty job list resolves immediately with an empty result
    /// set.
    pub async fn run(&self, jobs: Vec<CollectionJob>) -> AggregationRun {
        let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let total = jobs.len();

        log::info!("Run {id}: starting {total} collection task(s)");

        // Results merge under this single lock, held only for the
        // append so the I/O-bound collector calls never serialize.
        let results: Arc<Mutex<Vec<CollectionResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));
        let pool = Arc::new(Semaphore::new(self.pool_size));

        let mut workers = JoinSet::new();
        for (collector, task) in jobs {
            let pool = pool.clone();
            let results = results.clone();

            workers.spawn(async move {
                // The pool semaphore is never closed while workers run.
                let _slot = pool.acquire_owned().await.expect("worker pool closed");

                log::info!("Collecting {task} ({} → {})", task.start, task.end);

                let result = match collector.collect(&task).await {
                    Ok(data) => {
                        METRICS.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
                        log::info!("Collected {task}");
                        CollectionResult::ok(task, data)
                    }
                    Err(e) => {
                        METRICS.tasks_failed.fetch_add(1, Ordering::Relaxed);
                        log::error!("Collection failed for {task}: {e:#}");
                        CollectionResult::err(task, format!("{e:#}"))
                    }
                };

                results.lock().await.push(result);
            });
        }

        // Blocking join: the run is resolved only when every task has
        // returned, success or error.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                // A worker can only end this way by panicking; the
                // collector error path is handled above.
                log::error!("Run {id}: collection worker panicked: {e}");
            }
        }

        let results = {
            let mut merged = results.lock().await;
            std::mem::take(&mut *merged)
        };

        AggregationRun { id, started_at, status: RunStatus::Running, results }
    }
}
