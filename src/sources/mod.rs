//! Source collector registry and factory
//!
//! This module provides:
//! - Central registration of all supported auction platforms
//! - A factory function to resolve collectors by source
//!
//! All platform-specific logic must live in dedicated collector
//! modules. The rest of the application must interact exclusively
//! through the `SourceCollector` trait.

pub mod collector;
pub mod jao;
pub mod seecao;

use std::sync::Arc;

use collector::SourceCollector;

use crate::schema::Source;

/// Returns the collector instance for a source.
///
/// This function acts as the central factory for all supported
/// platforms. The HTTP client is shared; `reqwest::Client` clones
/// reuse one connection pool.
///
/// CONTRACT:
/// - `collector.name()` must equal `source.as_str()`
pub fn get_collector(source: Source, http: reqwest::Client) -> Arc<dyn SourceCollector> {
    match source {
        Source::Jao => Arc::new(jao::JaoCollector::new(http)),
        Source::Seecao => Arc::new(seecao::SeecaoCollector::new(http)),
    }
}

/// All sources collected by a full aggregation run.
pub fn all_sources() -> [Source; 2] {
    [Source::Jao, Source::Seecao]
}
