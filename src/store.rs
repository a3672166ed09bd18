use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use anyhow::Context;

use crate::config::StoreConfig;
use crate::util;

/// Metadata snapshot for one remote object.
///
/// Fetched fresh before every publish decision, never cached across
/// runs.
#[derive(Debug, Clone)]
pub struct RemoteObjectMeta {
    pub name: String,

    /// Last modification instant, if the store reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// ============================================================
/// ObjectStore
/// ============================================================
///
/// Seam between the conditional publisher and the remote store.
///
/// Session lifecycle: `sign_in` must succeed before `list`/`upload`;
/// `sign_out` must be called on every exit path, success or failure,
/// so no authenticated state leaks past a publish attempt.
///
/// Implementations must not retry internally; retry policy belongs
/// to the caller of the publisher.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Opens an authenticated session.
    async fn sign_in(&self) -> anyhow::Result<()>;

    /// Lists object metadata in the artifact bucket.
    async fn list(&self) -> anyhow::Result<Vec<RemoteObjectMeta>>;

    /// Uploads `bytes` as `name`.
    ///
    /// `upsert` selects overwrite (true) vs create (false) semantics;
    /// a create against an existing object is a remote error.
    async fn upload(&self, name: &str, bytes: Vec<u8>, upsert: bool) -> anyhow::Result<()>;

    /// Tears the session down. Best-effort; must not fail the caller.
    async fn sign_out(&self);
}

/// ============================================================
/// SupabaseStore
/// ============================================================
///
/// Supabase storage client for the artifact bucket.
///
/// Endpoints:
/// - `POST /auth/v1/token?grant_type=password` – password sign-in
/// - `POST /storage/v1/object/list/{bucket}`   – metadata listing
/// - `POST /storage/v1/object/{bucket}/{name}` – upload
/// - `POST /auth/v1/logout`                    – session teardown
///
/// The access token lives for one publish attempt; each attempt owns
/// its session end-to-end.
pub struct SupabaseStore {
    http: reqwest::Client,
    config: StoreConfig,
    token: Mutex<Option<String>>,
}

/// Cache lifetime hint attached to uploads, in seconds.
const CACHE_CONTROL: &str = "3600";

/// Raw listing entry as the storage API returns it.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    updated_at: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl SupabaseStore {
    pub fn new(http: reqwest::Client, config: StoreConfig) -> Self {
        Self { http, config, token: Mutex::new(None) }
    }

    async fn bearer(&self) -> anyhow::Result<String> {
        self.token
            .lock()
            .await
            .clone()
            .context("object store used before sign-in")
    }
}

#[async_trait::async_trait]
impl ObjectStore for SupabaseStore {
    async fn sign_in(&self) -> anyhow::Result<()> {
        log::info!("Signing in to object store...");

        let response: TokenResponse = self
            .http
            .post(format!("{}/auth/v1/token", self.config.url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.key)
            .json(&json!({
                "email": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .context("sign-in request")?
            .error_for_status()
            .context("sign-in rejected")?
            .json()
            .await
            .context("sign-in response")?;

        *self.token.lock().await = Some(response.access_token);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<RemoteObjectMeta>> {
        let token = self.bearer().await?;

        log::info!("Listing bucket '{}'...", self.config.bucket);

        let entries: Vec<ListEntry> = self
            .http
            .post(format!(
                "{}/storage/v1/object/list/{}",
                self.config.url, self.config.bucket
            ))
            .header("apikey", &self.config.key)
            .bearer_auth(&token)
            .json(&json!({
                "prefix": "",
                "limit": 10,
                "offset": 0,
                "sortBy": { "column": "name", "order": "desc" },
            }))
            .send()
            .await
            .context("list request")?
            .error_for_status()
            .context("list rejected")?
            .json()
            .await
            .context("list response")?;

        Ok(entries
            .into_iter()
            .map(|e| {
                // updated_at is authoritative; older deployments only
                // report created_at.
                let stamp = e.updated_at.or(e.created_at);
                let last_modified = stamp.as_deref().and_then(parse_store_timestamp);
                RemoteObjectMeta { name: e.name, last_modified }
            })
            .collect())
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>, upsert: bool) -> anyhow::Result<()> {
        let token = self.bearer().await?;

        log::info!(
            "Uploading '{name}' ({} bytes, upsert={upsert})...",
            bytes.len()
        );

        self.http
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.config.url, self.config.bucket, name
            ))
            .header("apikey", &self.config.key)
            .bearer_auth(&token)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .header("cache-control", CACHE_CONTROL)
            .header("content-type", "application/json")
            .body(bytes)
            .send()
            .await
            .context("upload request")?
            .error_for_status()
            .context("upload rejected")?;

        Ok(())
    }

    async fn sign_out(&self) {
        let token = self.token.lock().await.take();
        let Some(token) = token else { return };

        let result = self
            .http
            .post(format!("{}/auth/v1/logout", self.config.url))
            .header("apikey", &self.config.key)
            .bearer_auth(&token)
            .send()
            .await;

        if let Err(e) = result {
            log::warn!("Object store sign-out failed: {e}");
        }
    }
}

/// Parses a storage timestamp into UTC.
///
/// The API emits RFC 3339 with or without a trailing offset
/// depending on deployment age; both forms are accepted.
fn parse_store_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Formats a remote instant for the log stream, in the deployment's
/// reference timezone.
pub fn describe_remote_instant(ts: DateTime<Utc>) -> String {
    util::to_reference_tz(ts)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}
