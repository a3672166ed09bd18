use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A collected dataset, exactly as the remote platform returned it.
///
/// The shape is owned by the source collector. The aggregation
/// pipeline never inspects it; it is merged into the artifact as-is.
pub type Dataset = serde_json::Value;

// ------------------------------------------------------------
// Auction data sources
// ------------------------------------------------------------
//
// Every supported capacity-auction platform gets one variant.
// Adding a source requires:
// - a collector module under `sources/`
// - a registry entry in `sources::get_collector`
//
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    /// Joint Allocation Office (jao.eu)
    Jao,

    /// South East Europe Coordinated Auction Office (seecao.com)
    Seecao,
}

impl Source {
    /// Canonical identifier, used for logging and registry lookup.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Jao => "JAO",
            Source::Seecao => "SEECAO",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------
// Collection horizon
// ------------------------------------------------------------
//
// Time-bucketing granularity requested from a collector.
//
// IMPORTANT:
// - The horizon is opaque to the aggregation pipeline.
// - Horizon-specific behavior (e.g. JAO truncating Yearly windows
//   to year granularity) lives entirely inside the collectors.
//
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Horizon {
    Monthly,
    Yearly,
}

impl Horizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Monthly => "Monthly",
            Horizon::Yearly => "Yearly",
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------
// Collection task
// ------------------------------------------------------------
//
// One unit of work submitted to the worker pool.
// Immutable once scheduled. Task identity within a run is
// (source, horizon); the window is shared by all tasks of a run.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTask {
    /// Which platform to collect from
    pub source: Source,

    /// Requested bucketing granularity (passed through opaquely)
    pub horizon: Horizon,

    /// Inclusive start of the collection window
    pub start: DateTime<Utc>,

    /// Inclusive end of the collection window
    pub end: DateTime<Utc>,
}

impl CollectionTask {
    /// Stable task key used to match results back to submitted work.
    pub fn key(&self) -> (Source, Horizon) {
        (self.source, self.horizon)
    }
}

impl std::fmt::Display for CollectionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.horizon)
    }
}

/// Outcome of one collection task.
///
/// Exactly one of payload/error, expressed as a `Result`:
/// - `Ok(dataset)`  – the source returned data
/// - `Err(message)` – the collector failed
///
/// A failed task never aborts its siblings; it simply carries its
/// error here and stays visible in the run state.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub task: CollectionTask,
    pub outcome: Result<Dataset, String>,
}

impl CollectionResult {
    pub fn ok(task: CollectionTask, data: Dataset) -> Self {
        Self { task, outcome: Ok(data) }
    }

    pub fn err(task: CollectionTask, message: impl Into<String>) -> Self {
        Self { task, outcome: Err(message.into()) }
    }
}

// ------------------------------------------------------------
// Aggregation run
// ------------------------------------------------------------

/// Lifecycle state of an aggregation run.
///
/// Transitions:
/// - `Running`   → created when the run guard admits a new run
/// - `Completed` → all tasks resolved and the artifact was written
///   (or there was nothing to write)
/// - `Failed`    → unrecoverable orchestration error (artifact write
///   failure); NEVER entered because of a single task error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// One end-to-end execution of the collect → merge → write → publish
/// pipeline. At most one run is `Running` at any time; the run guard
/// enforces this.
#[derive(Debug)]
pub struct AggregationRun {
    /// Monotonic run id (process-local)
    pub id: u64,

    /// When the run was admitted
    pub started_at: DateTime<Utc>,

    pub status: RunStatus,

    /// One entry per submitted task, in completion order.
    ///
    /// Completion order carries no meaning; results are keyed by
    /// task identity.
    pub results: Vec<CollectionResult>,
}
