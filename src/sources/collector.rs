use crate::schema::{CollectionTask, Dataset};

/// SourceCollector is the abstraction layer between:
/// - The generic aggregation runtime
/// - Platform-specific auction APIs
///
/// Each platform implementation must:
/// - Fetch auction rows for the task's window and horizon
/// - Return them as a single self-describing dataset
///
/// DESIGN GOALS:
/// - Zero platform-specific logic outside collectors
/// - One collector per platform
/// - The orchestrator treats every collector as opaque
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Collector instances are shared across worker tasks
///
#[async_trait::async_trait]
pub trait SourceCollector: Send + Sync {
    /// Canonical source name.
    ///
    /// CONTRACT:
    /// - Must match `Source::as_str` for the platform
    /// - Used for logging and dataset tagging
    fn name(&self) -> &'static str;

    /// Fetches the dataset for one collection task.
    ///
    /// INPUT:
    /// - `task`: window and horizon to collect; horizon semantics
    ///   (e.g. yearly truncation) are decided here, not upstream
    ///
    /// OUTPUT:
    /// - `Ok(dataset)` with the platform's rows
    /// - `Err` for any transport, status, or decode failure
    ///
    /// IMPORTANT:
    /// - This function must NEVER panic; failures are returned and
    ///   recorded against the task, siblings keep running.
    async fn collect(&self, task: &CollectionTask) -> anyhow::Result<Dataset>;
}
