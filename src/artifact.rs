use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::schema::{CollectionResult, Dataset};

/// Handle to a freshly written artifact.
///
/// `generated_at` is the freshness reference the publisher compares
/// remote metadata against.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub generated_at: DateTime<Utc>,
}

/// Serializes a run's successful payloads to the durable artifact.
///
/// The artifact is a single JSON array, one element per successful
/// task, overwritten in place each run. Failed tasks are excluded;
/// their errors already surfaced through the run's result set and
/// the log stream.
///
/// ATOMICITY:
/// - The array is written to a sibling `.tmp` file and renamed over
///   the final path, so a crash or disk error mid-write never leaves
///   a partial artifact at the published location.
pub struct ArtifactWriter {
    path: PathBuf,
}

impl ArtifactWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Writes the artifact and returns its handle.
    ///
    /// Any I/O or serialization failure propagates to the caller,
    /// which marks the run `Failed`. No retry here.
    pub fn write(&self, results: &[CollectionResult]) -> anyhow::Result<ArtifactHandle> {
        let payloads: Vec<&Dataset> = results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .collect();

        let body = serde_json::to_vec(&payloads).context("serializing artifact")?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &body)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;

        Ok(ArtifactHandle {
            path: self.path.clone(),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use serde_json::json;

    use crate::schema::{CollectionTask, Horizon, Source};

    fn task(source: Source, horizon: Horizon) -> CollectionTask {
        CollectionTask {
            source,
            horizon,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap(),
        }
    }

    #[test]
    fn writes_successful_payloads_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auctions.json");

        let results = vec![
            CollectionResult::ok(task(Source::Jao, Horizon::Monthly), json!({"rows": 3})),
            CollectionResult::err(task(Source::Jao, Horizon::Yearly), "upstream 502"),
            CollectionResult::ok(task(Source::Seecao, Horizon::Monthly), json!({"rows": 1})),
        ];

        let handle = ArtifactWriter::new(&path).write(&results).unwrap();
        assert_eq!(handle.path, path);

        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!([{"rows": 3}, {"rows": 1}]));

        // No temp file left behind.
        assert!(!dir.path().join("auctions.tmp").exists());
    }

    #[test]
    fn overwrites_prior_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auctions.json");
        let writer = ArtifactWriter::new(&path);

        writer
            .write(&[CollectionResult::ok(
                task(Source::Jao, Horizon::Monthly),
                json!({"run": 1}),
            )])
            .unwrap();
        writer
            .write(&[CollectionResult::ok(
                task(Source::Jao, Horizon::Monthly),
                json!({"run": 2}),
            )])
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!([{"run": 2}]));
    }

    #[test]
    fn missing_parent_directory_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("auctions.json");

        let err = ArtifactWriter::new(&path)
            .write(&[CollectionResult::ok(
                task(Source::Jao, Horizon::Monthly),
                json!({}),
            )])
            .unwrap_err();
        assert!(err.to_string().contains("writing"));
    }
}
