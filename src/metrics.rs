use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the aggregation service.
///
/// Purpose:
/// - Track run admissions and rejections
/// - Track per-task collection outcomes
/// - Track log relay throughput and live subscribers
/// - Track publish decisions
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Runs
    pub runs_started: AtomicUsize,
    pub runs_completed: AtomicUsize,
    pub runs_failed: AtomicUsize,
    pub runs_rejected: AtomicUsize,

    // Collection tasks
    pub tasks_succeeded: AtomicUsize,
    pub tasks_failed: AtomicUsize,

    // Log relay
    pub records_relayed: AtomicUsize,
    pub subscribers_active: AtomicUsize,

    // Publishing
    pub uploads: AtomicUsize,
    pub publish_skips: AtomicUsize,
    pub publish_failures: AtomicUsize,
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
