use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Error taxonomy from the component design: each variant is a contract, not
/// just a wrapped library error — callers match on these to decide retry vs.
/// drop vs. fatal-abort behavior (spec.md §7).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket send/recv failure, ping timeout, or idle-timeout disconnect.
    /// Triggers reconnect with backoff; `subscribed` is retained for restore.
    #[error("transient upstream error: {0}")]
    TransientUpstream(#[from] tokio_tungstenite::tungstenite::Error),

    /// Store connect/query failure or pool exhaustion. Marks `db_connected =
    /// false`; a sweep's side effects are dropped but retried next interval.
    #[error("transient store error: {0}")]
    TransientStore(#[from] sqlx::Error),

    /// Non-200 HTTP, timeout, or connection error from the automation
    /// endpoint. Retried a bounded number of times inside one flush attempt.
    #[error("automation sink error: {0}")]
    AutomationFailure(#[from] reqwest::Error),

    /// Automation sink exhausted `AUTOMATION_MAX_RETRIES` without a 2xx
    /// response; the caller clears its buffer regardless (spec.md §4.8).
    #[error("automation sink retries exhausted: {0}")]
    AutomationRetriesExhausted(String),

    /// Out-of-range configuration value; rejected, existing config unchanged.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Startup condition that cannot be recovered from at runtime (e.g. an
    /// empty phase reference table).
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// Automation endpoint returned 404 — treated as misconfiguration.
    /// Forwarding is disabled for the remainder of the process run.
    #[error("fatal: automation endpoint returned 404")]
    Fatal,

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Fatal => StatusCode::FAILED_DEPENDENCY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
