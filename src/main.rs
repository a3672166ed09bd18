// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration loaded from the environment
// - schema:     Strongly typed task / result / run definitions
// - util:       Shared helper utilities (dates, timezones)
// - guard:      Single-flight admission for aggregation runs
// - relay:      Log relay (producer queue + broadcast fan-out)
// - sources:    Source collectors and the collector registry
// - aggregator: Worker-pool fan-out and the run pipeline
// - artifact:   Durable artifact serialization
// - store:      Remote object-store client
// - publisher:  Conditional (staleness-gated) publishing
// - server:     HTTP trigger and log stream endpoints
//
mod config;
mod schema;
mod util;
mod guard;
mod relay;
mod sources;
mod aggregator;
mod artifact;
mod store;
mod publisher;
mod server;
mod metrics;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::sleep;

use config::Config;
use guard::RunGuard;
use metrics::METRICS;
use relay::{LogRelay, RelayLogger};
use server::AppState;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the auction aggregation service.
//
// Responsibilities:
// - Install the dual console/relay logger
// - Load configuration from the environment
// - Start the relay pump and metrics reporter
// - Serve the HTTP trigger and log stream endpoints
//
// Exit behavior:
// - 0 on normal server shutdown
// - non-zero on unrecoverable startup errors (bad configuration,
//   bind failure)
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // Logging must come up first so configuration errors are
    // visible. Records go to the console and, once the pump is
    // running, to every live stream subscriber.
    // --------------------------------------------------------
    let (relay, pump) = LogRelay::new();
    RelayLogger::install(relay.clone())?;
    tokio::spawn(pump.run());

    // --------------------------------------------------------
    // Load configuration from the environment
    //
    // NOTE:
    // - Secrets arrive via the environment (.env injected by the
    //   process manager) and must not be committed anywhere.
    // --------------------------------------------------------
    let config = Config::from_env()?;

    log::info!(
        "Aggregator running (pool={}, artifact={}, default window {} → {})",
        config.pool_size,
        config.artifact_path.display(),
        config.default_start,
        config.default_end,
    );

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(60)).await;

            log::info!(
                "[METRICS] runs={}/{}ok/{}failed rejected={} tasks={}ok/{}failed relayed={} subs={} uploads={} skips={} pub_err={}",
                METRICS.runs_started.load(Ordering::Relaxed),
                METRICS.runs_completed.load(Ordering::Relaxed),
                METRICS.runs_failed.load(Ordering::Relaxed),
                METRICS.runs_rejected.load(Ordering::Relaxed),
                METRICS.tasks_succeeded.load(Ordering::Relaxed),
                METRICS.tasks_failed.load(Ordering::Relaxed),
                METRICS.records_relayed.load(Ordering::Relaxed),
                METRICS.subscribers_active.load(Ordering::Relaxed),
                METRICS.uploads.load(Ordering::Relaxed),
                METRICS.publish_skips.load(Ordering::Relaxed),
                METRICS.publish_failures.load(Ordering::Relaxed),
            );
        }
    });

    // --------------------------------------------------------
    // Serve until shutdown
    // --------------------------------------------------------
    let state = AppState {
        config: Arc::new(config),
        guard: Arc::new(RunGuard::new()),
        relay,
    };

    server::serve(state).await
}
