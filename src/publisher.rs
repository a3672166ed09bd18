use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};

use crate::artifact::ArtifactHandle;
use crate::metrics::METRICS;
use crate::store::{ObjectStore, RemoteObjectMeta, describe_remote_instant};

/// Final outcome of one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Uploaded,
    Skipped,
    Failed(String),
}

/// What to do with the remote object, decided from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// No remote copy: upload with create semantics.
    Create,

    /// Remote copy is stale (or of unknown age): upload with
    /// overwrite semantics.
    Overwrite,

    /// Remote copy is at least as fresh as the local artifact.
    Skip,
}

/// Staleness policy: the remote copy is replaced only if its
/// last-modified instant predates the local artifact's generation
/// time. Mere existence of a remote copy is not a reason to upload.
///
/// A remote object without any usable timestamp is treated as stale;
/// its age cannot be vouched for.
pub fn decide(remote: Option<&RemoteObjectMeta>, generated_at: DateTime<Utc>) -> PublishDecision {
    match remote {
        None => PublishDecision::Create,
        Some(meta) => match meta.last_modified {
            None => PublishDecision::Overwrite,
            Some(ts) if ts < generated_at => PublishDecision::Overwrite,
            Some(_) => PublishDecision::Skip,
        },
    }
}

/// Publishes the local artifact to the remote store when the remote
/// copy is stale or absent.
///
/// Session discipline: one authenticated session per attempt, opened
/// at the start and torn down on every exit path. No retries here;
/// retry policy is the caller's.
pub struct ConditionalPublisher<S> {
    store: S,
    remote_name: String,
}

impl<S: ObjectStore> ConditionalPublisher<S> {
    pub fn new(store: S, remote_name: String) -> Self {
        Self { store, remote_name }
    }

    pub async fn publish_if_stale(&self, artifact: &ArtifactHandle) -> PublishOutcome {
        if let Err(e) = self.store.sign_in().await {
            log::error!("Publish aborted, sign-in failed: {e:#}");
            METRICS.publish_failures.fetch_add(1, Ordering::Relaxed);
            return PublishOutcome::Failed(format!("{e:#}"));
        }

        let outcome = self.try_publish(artifact).await;

        // Teardown on every path, including errors above.
        self.store.sign_out().await;

        match outcome {
            Ok(outcome) => {
                match outcome {
                    PublishOutcome::Uploaded => {
                        METRICS.uploads.fetch_add(1, Ordering::Relaxed)
                    }
                    PublishOutcome::Skipped => {
                        METRICS.publish_skips.fetch_add(1, Ordering::Relaxed)
                    }
                    PublishOutcome::Failed(_) => {
                        METRICS.publish_failures.fetch_add(1, Ordering::Relaxed)
                    }
                };
                outcome
            }
            Err(e) => {
                log::error!("Publish failed: {e:#}");
                METRICS.publish_failures.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    async fn try_publish(&self, artifact: &ArtifactHandle) -> anyhow::Result<PublishOutcome> {
        let objects = self.store.list().await?;
        let remote = objects.into_iter().find(|o| o.name == self.remote_name);

        match decide(remote.as_ref(), artifact.generated_at) {
            PublishDecision::Skip => {
                if let Some(ts) = remote.as_ref().and_then(|m| m.last_modified) {
                    log::info!(
                        "Remote '{}' modified {}, newer than local artifact; skipping upload",
                        self.remote_name,
                        describe_remote_instant(ts),
                    );
                }
                Ok(PublishOutcome::Skipped)
            }

            PublishDecision::Create => {
                log::info!("No remote copy of '{}'; uploading", self.remote_name);
                let bytes = std::fs::read(&artifact.path)?;
                self.store.upload(&self.remote_name, bytes, false).await?;
                Ok(PublishOutcome::Uploaded)
            }

            PublishDecision::Overwrite => {
                log::info!(
                    "Remote '{}' is stale; overwriting with local artifact",
                    self.remote_name
                );
                let bytes = std::fs::read(&artifact.path)?;
                self.store.upload(&self.remote_name, bytes, true).await?;
                Ok(PublishOutcome::Uploaded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use chrono::TimeZone;
    use tokio::sync::Mutex;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn meta(last_modified: Option<DateTime<Utc>>) -> RemoteObjectMeta {
        RemoteObjectMeta { name: "auctions.json".into(), last_modified }
    }

    #[test]
    fn decision_matrix() {
        // Absent remote → create.
        assert_eq!(decide(None, at(12)), PublishDecision::Create);

        // Remote older than the artifact → overwrite.
        assert_eq!(
            decide(Some(&meta(Some(at(10)))), at(12)),
            PublishDecision::Overwrite
        );

        // Remote newer or equal → skip.
        assert_eq!(decide(Some(&meta(Some(at(12)))), at(12)), PublishDecision::Skip);
        assert_eq!(decide(Some(&meta(Some(at(14)))), at(12)), PublishDecision::Skip);

        // Remote of unknown age → overwrite.
        assert_eq!(decide(Some(&meta(None)), at(12)), PublishDecision::Overwrite);
    }

    /// In-memory store recording the session protocol.
    #[derive(Default)]
    struct FakeStore {
        objects: Mutex<Vec<RemoteObjectMeta>>,
        fail_sign_in: bool,
        fail_upload: bool,
        sign_ins: AtomicUsize,
        sign_outs: AtomicUsize,
        uploads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectStore for Arc<FakeStore> {
        async fn sign_in(&self) -> anyhow::Result<()> {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
            if self.fail_sign_in {
                anyhow::bail!("bad credentials");
            }
            Ok(())
        }

        async fn list(&self) -> anyhow::Result<Vec<RemoteObjectMeta>> {
            Ok(self.objects.lock().await.clone())
        }

        async fn upload(&self, name: &str, _bytes: Vec<u8>, upsert: bool) -> anyhow::Result<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_upload {
                anyhow::bail!("storage unavailable");
            }
            let mut objects = self.objects.lock().await;
            let exists = objects.iter().any(|o| o.name == name);
            anyhow::ensure!(upsert || !exists, "object exists and upsert is off");
            objects.retain(|o| o.name != name);
            objects.push(RemoteObjectMeta {
                name: name.to_string(),
                last_modified: Some(Utc::now()),
            });
            Ok(())
        }

        async fn sign_out(&self) {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn artifact_on_disk(dir: &tempfile::TempDir) -> ArtifactHandle {
        let path = dir.path().join("auctions.json");
        std::fs::write(&path, b"[]").unwrap();
        ArtifactHandle { path, generated_at: Utc::now() }
    }

    #[tokio::test]
    async fn uploads_then_skips_when_remote_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_on_disk(&dir);

        let store = Arc::new(FakeStore::default());
        let publisher =
            ConditionalPublisher::new(store.clone(), "auctions.json".to_string());

        // First attempt: no remote copy → uploaded.
        assert_eq!(
            publisher.publish_if_stale(&artifact).await,
            PublishOutcome::Uploaded
        );

        // Second attempt with an unchanged artifact: the remote copy
        // now postdates it → skipped.
        assert_eq!(
            publisher.publish_if_stale(&artifact).await,
            PublishOutcome::Skipped
        );

        assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
        // One session per attempt, each torn down.
        assert_eq!(store.sign_ins.load(Ordering::SeqCst), 2);
        assert_eq!(store.sign_outs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overwrites_stale_remote() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_on_disk(&dir);

        let store = Arc::new(FakeStore::default());
        store.objects.lock().await.push(meta(Some(
            artifact.generated_at - chrono::Duration::hours(6),
        )));

        let publisher =
            ConditionalPublisher::new(store.clone(), "auctions.json".to_string());
        assert_eq!(
            publisher.publish_if_stale(&artifact).await,
            PublishOutcome::Uploaded
        );
        assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_in_failure_is_surfaced_without_listing() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_on_disk(&dir);

        let store = Arc::new(FakeStore { fail_sign_in: true, ..FakeStore::default() });
        let publisher =
            ConditionalPublisher::new(store.clone(), "auctions.json".to_string());

        let outcome = publisher.publish_if_stale(&artifact).await;
        assert!(matches!(outcome, PublishOutcome::Failed(cause) if cause.contains("bad credentials")));
        assert_eq!(store.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_failure_still_tears_session_down() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_on_disk(&dir);

        let store = Arc::new(FakeStore { fail_upload: true, ..FakeStore::default() });
        let publisher =
            ConditionalPublisher::new(store.clone(), "auctions.json".to_string());

        let outcome = publisher.publish_if_stale(&artifact).await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
        assert_eq!(store.sign_outs.load(Ordering::SeqCst), 1);
    }
}
