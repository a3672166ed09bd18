use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;

use crate::util;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Loaded from environment variables at startup (the deployment
// ships them via a `.env` file injected by the process manager).
//
// It defines:
// - Trigger authentication
// - Remote object-store access
// - The default collection window
// - Worker pool sizing and local artifact placement
//
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret required by the `POST /run` trigger
    pub secret_phrase: String,

    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,

    /// Remote object-store connection settings
    pub store: StoreConfig,

    /// Local path the merged artifact is written to.
    /// The file name doubles as the remote object name.
    pub artifact_path: PathBuf,

    /// Maximum number of collection tasks in flight at once
    pub pool_size: usize,

    /// Collection window used when the trigger omits dates
    pub default_start: NaiveDate,
    pub default_end: NaiveDate,
}

// ------------------------------------------------------------
// Object-store configuration
// ------------------------------------------------------------
//
// Credentials for the Supabase storage deployment holding the
// published artifact.
//
// Notes:
// - `key` is the project's anon API key; `email`/`password` are a
//   storage user with write access to the bucket. All three are
//   security-sensitive and must never be committed.
//
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base project URL (https://<project>.supabase.co)
    pub url: String,

    /// Project API key sent with every request
    pub key: String,

    /// Storage user credentials for the password sign-in
    pub email: String,
    pub password: String,

    /// Bucket holding the published artifact
    pub bucket: String,
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// Required variables fail fast with a descriptive error, which
    /// `main` turns into a non-zero exit.
    pub fn from_env() -> anyhow::Result<Self> {
        let secret_phrase = required("SECRET_PHRASE")?;

        let store = StoreConfig {
            url: required("SUPABASE_URL")?,
            key: required("SUPABASE_KEY")?,
            email: required("SUPABASE_USER")?,
            password: required("SUPABASE_USER_PASS")?,
            bucket: optional("BUCKET_NAME").unwrap_or_else(|| "capmap-storage".to_string()),
        };

        let bind_addr = optional("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        let artifact_path = PathBuf::from(
            optional("ARTIFACT_PATH").unwrap_or_else(|| "auctions.json".to_string()),
        );

        let pool_size = match optional("POOL_SIZE") {
            Some(raw) => {
                let n: usize = raw.parse().context("POOL_SIZE is not a number")?;
                anyhow::ensure!(n > 0, "POOL_SIZE must be at least 1");
                n
            }
            None => 10,
        };

        // Default window matches the deployment's historical backfill
        // range; a trigger with explicit dates overrides it.
        let default_start = parse_date_var("DEFAULT_START_DATE", "2019-12-01")?;
        let default_end = parse_date_var("DEFAULT_END_DATE", "2025-01-01")?;
        anyhow::ensure!(
            default_start <= default_end,
            "DEFAULT_START_DATE is after DEFAULT_END_DATE"
        );

        Ok(Self {
            secret_phrase,
            bind_addr,
            store,
            artifact_path,
            pool_size,
            default_start,
            default_end,
        })
    }

    /// Object name under which the artifact is published.
    pub fn remote_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "auctions.json".to_string())
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_date_var(name: &str, default: &str) -> anyhow::Result<NaiveDate> {
    let raw = optional(name).unwrap_or_else(|| default.to_string());
    util::parse_trigger_date(&raw)
        .with_context(|| format!("{name} must be a YYYY-MM-DD date, got '{raw}'"))
}
