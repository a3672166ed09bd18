/// Aggregator module
///
/// This module groups all logic responsible for:
/// - Fanning one collection run out across sources and horizons
/// - Merging partial results under partial-failure tolerance
/// - Driving the write → publish tail of the pipeline
///
/// The aggregator layer sits between:
/// - Source collectors (JAO, SEECAO, …)
/// - The artifact writer and the conditional publisher
///
/// Design notes:
/// - Platform-specific logic MUST NOT live here
/// - A single task's failure never aborts the run
pub mod runner;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::artifact::ArtifactWriter;
use crate::config::Config;
use crate::metrics::METRICS;
use crate::publisher::{ConditionalPublisher, PublishOutcome};
use crate::schema::{CollectionTask, Horizon, RunStatus};
use crate::sources::{self, collector::SourceCollector};
use crate::store::SupabaseStore;

use runner::{CollectionJob, Orchestrator};

/// Builds the full fan-out for one run: every registered source at
/// every horizon, all sharing the run's collection window.
pub fn build_jobs(
    http: reqwest::Client,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<CollectionJob> {
    let mut jobs = Vec::new();
    for source in sources::all_sources() {
        let collector: Arc<dyn SourceCollector> = sources::get_collector(source, http.clone());
        for horizon in [Horizon::Monthly, Horizon::Yearly] {
            jobs.push((
                collector.clone(),
                CollectionTask { source, horizon, start, end },
            ));
        }
    }
    jobs
}

/// Runs one end-to-end pipeline: collect → merge → write → publish.
///
/// The caller holds the run permit for the duration of this call;
/// dropping it afterwards reopens the trigger.
///
/// Failure policy:
/// - task errors are recorded and logged, the run continues
/// - an artifact write error fails the run
/// - a publish failure is logged but does not fail the run
pub async fn run_pipeline(config: Arc<Config>, start: DateTime<Utc>, end: DateTime<Utc>) {
    METRICS.runs_started.fetch_add(1, Ordering::Relaxed);

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            log::error!("Could not build HTTP client: {e}");
            METRICS.runs_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let jobs = build_jobs(http.clone(), start, end);
    let orchestrator = Orchestrator::new(config.pool_size);
    let mut run = orchestrator.run(jobs).await;

    let collected = run.results.iter().filter(|r| r.outcome.is_ok()).count();
    let failed = run.results.len() - collected;
    log::info!(
        "Run {} resolved: {} dataset(s) collected, {} task(s) failed",
        run.id,
        collected,
        failed
    );

    if collected == 0 {
        // Mirrors the "no data collected" outcome: nothing to write,
        // nothing to publish.
        log::warn!("Run {}: no data collected, skipping artifact write", run.id);
        run.status = RunStatus::Completed;
        METRICS.runs_completed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let writer = ArtifactWriter::new(&config.artifact_path);
    let handle = match writer.write(&run.results) {
        Ok(handle) => {
            run.status = RunStatus::Completed;
            METRICS.runs_completed.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "Run {}: artifact written to {}",
                run.id,
                handle.path.display()
            );
            handle
        }
        Err(e) => {
            run.status = RunStatus::Failed;
            METRICS.runs_failed.fetch_add(1, Ordering::Relaxed);
            log::error!("Run {}: artifact write failed: {e:#}", run.id);
            return;
        }
    };

    // Publishing is isolated from collection success: a failed upload
    // leaves the local artifact valid and the run Completed.
    let store = SupabaseStore::new(http, config.store.clone());
    let publisher = ConditionalPublisher::new(store, config.remote_name());
    match publisher.publish_if_stale(&handle).await {
        PublishOutcome::Uploaded => log::info!("Run {}: artifact uploaded", run.id),
        PublishOutcome::Skipped => {
            log::info!("Run {}: remote copy is current, upload skipped", run.id)
        }
        PublishOutcome::Failed(cause) => {
            log::error!("Run {}: publish failed: {cause}", run.id)
        }
    }

    let elapsed = Utc::now() - run.started_at;
    log::info!(
        "Run {} {:?} in {:.2}s",
        run.id,
        run.status,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
}
