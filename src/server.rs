use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::NaiveDate;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::aggregator;
use crate::config::Config;
use crate::guard::RunGuard;
use crate::metrics::METRICS;
use crate::relay::{LogRecord, LogRelay};
use crate::util;

// ------------------------------------------------------------
// Shared server state
// ------------------------------------------------------------
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub guard: Arc<RunGuard>,
    pub relay: LogRelay,
}

// ------------------------------------------------------------
// API error taxonomy
// ------------------------------------------------------------
//
// Only trigger-facing errors live here. Task errors stay inside the
// run's result set; publish errors stay inside the pipeline. Each
// variant maps to the status code observers key their automation on.
//
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Secret mismatch on the trigger
    #[error("Forbidden: invalid secret phrase")]
    Forbidden,

    /// Malformed trigger input; no side effects happened
    #[error("{0}")]
    InvalidInput(String),

    /// A run is already in flight; the trigger is rejected, not queued
    #[error("a collection run is already in progress")]
    RunActive,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::RunActive => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = ErrorBody { error: self.to_string() };
        (code, Json(body)).into_response()
    }
}

// ------------------------------------------------------------
// Trigger endpoint
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Shared secret; absent counts as a mismatch
    pub secret: Option<String>,

    /// Optional collection window, strict YYYY-MM-DD
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub message: String,
    pub start_date: String,
    pub end_date: String,
}

/// `POST /run`: triggers one aggregation run.
///
/// Responses:
/// - 200 with the effective window: run admitted and started in the
///   background
/// - 403: secret mismatch
/// - 400: malformed dates
/// - 409: a run is already active
pub async fn trigger_run(
    Extension(state): Extension<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<RunAccepted>, ApiError> {
    if body.secret.as_deref() != Some(state.config.secret_phrase.as_str()) {
        log::warn!("Trigger rejected: invalid secret phrase");
        return Err(ApiError::Forbidden);
    }

    // Validation happens before admission so a malformed trigger
    // leaves no state behind.
    let (start_date, end_date) = resolve_window(&body, &state.config)?;

    let Some(permit) = state.guard.try_acquire() else {
        METRICS.runs_rejected.fetch_add(1, Ordering::Relaxed);
        log::warn!("Trigger rejected: a run is already in progress");
        return Err(ApiError::RunActive);
    };

    log::info!("Trigger accepted: collecting {start_date} → {end_date}");

    let (start, end) = util::window_bounds(start_date, end_date);
    let config = state.config.clone();
    tokio::spawn(async move {
        aggregator::run_pipeline(config, start, end).await;
        // Reopens the trigger; also runs if the pipeline panics.
        drop(permit);
    });

    Ok(Json(RunAccepted {
        message: "Aggregation run started".to_string(),
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
    }))
}

/// Resolves the trigger's window against the configured defaults.
///
/// Rules:
/// - `end_date` without `start_date` is rejected
/// - both dates must be strict `YYYY-MM-DD`
/// - `start_date` must not be after `end_date`
fn resolve_window(body: &RunRequest, config: &Config) -> Result<(NaiveDate, NaiveDate), ApiError> {
    if body.start_date.is_none() && body.end_date.is_some() {
        return Err(ApiError::InvalidInput(
            "end_date requires start_date".to_string(),
        ));
    }

    let parse = |raw: &str, field: &str| {
        util::parse_trigger_date(raw).ok_or_else(|| {
            ApiError::InvalidInput(format!("{field} must be a YYYY-MM-DD date, got '{raw}'"))
        })
    };

    let start = match body.start_date.as_deref() {
        Some(raw) => parse(raw, "start_date")?,
        None => config.default_start,
    };
    let end = match body.end_date.as_deref() {
        Some(raw) => parse(raw, "end_date")?,
        None => config.default_end,
    };

    if start > end {
        return Err(ApiError::InvalidInput(
            "start_date is after end_date".to_string(),
        ));
    }

    Ok((start, end))
}

// ------------------------------------------------------------
// Log stream transports
// ------------------------------------------------------------
//
// SSE and WebSocket sit behind the same relay subscription contract:
// register a receiver at connect time, stream rendered lines, drop
// the receiver (deregistration) on disconnect or transport error.
//

/// Tracks one live streaming connection in the metrics.
struct SubscriberGuard;

impl SubscriberGuard {
    fn register() -> Self {
        METRICS.subscribers_active.fetch_add(1, Ordering::Relaxed);
        Self
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        METRICS.subscribers_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// `GET /sse/logs`: live log lines as server-sent events.
pub async fn sse_logs(
    Extension(state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send> {
    let rx = state.relay.subscribe();
    let guard = SubscriberGuard::register();

    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        let _connection = &guard;
        match item {
            Ok(record) => Some(Ok(SseEvent::default().data(record.render()))),

            // Slow consumer: the ring buffer already dropped the old
            // records; keep the stream alive rather than erroring.
            Err(BroadcastStreamRecvError::Lagged(_)) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /ws/logs`: the same live stream over a WebSocket.
pub async fn ws_logs(
    ws: WebSocketUpgrade,
    Extension(state): Extension<AppState>,
) -> Response {
    let rx = state.relay.subscribe();
    ws.on_upgrade(move |socket| stream_logs_ws(socket, rx))
}

async fn stream_logs_ws(mut socket: WebSocket, mut rx: broadcast::Receiver<LogRecord>) {
    let _connection = SubscriberGuard::register();

    loop {
        match rx.recv().await {
            Ok(record) => {
                // Send failure means the client went away; dropping
                // the receiver deregisters the subscriber.
                if socket
                    .send(Message::Text(record.render().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                let note = format!("... {skipped} log line(s) dropped (slow consumer)");
                if socket.send(Message::Text(note.into())).await.is_err() {
                    break;
                }
            }

            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ------------------------------------------------------------
// Status page + health
// ------------------------------------------------------------

/// Minimal observer page tailing the SSE stream.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <title>Log Stream</title>
    </head>
    <body>
        <h1>Log Stream</h1>
        <p>Please don't reload.</p>
        <pre id="log"></pre>
        <script>
            const eventSource = new EventSource("/sse/logs");
            const logElement = document.getElementById("log");
            eventSource.onmessage = function(event) {
                logElement.textContent += event.data + "\n";
            };
        </script>
    </body>
</html>
"#;

pub async fn index() -> Html<&'static str> {
    log::info!("GET request received at root endpoint");
    Html(INDEX_HTML)
}

pub async fn health(Extension(state): Extension<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "run_active": state.guard.is_active(),
    }))
}

// ------------------------------------------------------------
// Router + serve
// ------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/run", post(trigger_run))
        .route("/logs", get(sse_logs))
        .route("/sse/logs", get(sse_logs))
        .route("/ws/logs", get(ws_logs))
        .route("/health", get(health))
        .layer(Extension(state))
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("Listening on {addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use crate::config::StoreConfig;

    fn test_config() -> Config {
        Config {
            secret_phrase: "right".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            store: StoreConfig {
                url: "http://localhost".to_string(),
                key: "anon".to_string(),
                email: "user@example.com".to_string(),
                password: "pass".to_string(),
                bucket: "capmap-storage".to_string(),
            },
            artifact_path: PathBuf::from("auctions.json"),
            pool_size: 2,
            default_start: NaiveDate::from_ymd_opt(2019, 12, 1).unwrap(),
            default_end: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    fn test_state() -> AppState {
        let (relay, _pump) = LogRelay::new();
        AppState {
            config: Arc::new(test_config()),
            guard: Arc::new(RunGuard::new()),
            relay,
        }
    }

    fn request(
        secret: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> RunRequest {
        RunRequest {
            secret: secret.map(str::to_string),
            start_date: start_date.map(str::to_string),
            end_date: end_date.map(str::to_string),
        }
    }

    #[test]
    fn window_defaults_when_dates_omitted() {
        let config = test_config();
        let (start, end) = resolve_window(&request(Some("right"), None, None), &config).unwrap();
        assert_eq!(start, config.default_start);
        assert_eq!(end, config.default_end);
    }

    #[test]
    fn window_rejects_end_without_start() {
        let err = resolve_window(
            &request(Some("right"), None, Some("2024-01-01")),
            &test_config(),
        )
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn window_rejects_bad_format() {
        for bad in ["01-02-2024", "2024/01/02", "2024-13-01", "yesterday"] {
            let err = resolve_window(
                &request(Some("right"), Some(bad), None),
                &test_config(),
            )
            .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "input: {bad}");
        }
    }

    #[test]
    fn window_rejects_start_after_end() {
        let err = resolve_window(
            &request(Some("right"), Some("2024-02-01"), Some("2024-01-01")),
            &test_config(),
        )
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_rejects_wrong_secret() {
        let state = test_state();
        let result = trigger_run(
            Extension(state),
            Json(request(Some("wrong"), None, None)),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden)));
    }

    #[tokio::test]
    async fn trigger_rejects_missing_secret() {
        let state = test_state();
        let result = trigger_run(Extension(state), Json(request(None, None, None))).await;
        assert!(matches!(result, Err(ApiError::Forbidden)));
    }

    #[tokio::test]
    async fn trigger_conflicts_while_run_active() {
        let state = test_state();
        let _held = state.guard.try_acquire().expect("free guard");

        let result = trigger_run(
            Extension(state.clone()),
            Json(request(Some("right"), None, None)),
        )
        .await;
        assert!(matches!(result, Err(ApiError::RunActive)));
    }

    #[tokio::test]
    async fn validation_happens_before_admission() {
        let state = test_state();

        let result = trigger_run(
            Extension(state.clone()),
            Json(request(Some("right"), Some("2024-02-01"), Some("2024-01-01"))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));

        // The malformed trigger must not have consumed the guard.
        assert!(!state.guard.is_active());
    }
}
