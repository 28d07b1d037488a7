use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(String),

    #[error("{0}")]
    Validation(String),

    #[error("alert {0} not found")]
    NotFound(String),

    #[error("no quote for {symbol}: {reason}")]
    QuoteUnavailable { symbol: String, reason: String },

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("alert monitor already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, AlertError>;

/// Runs `fut` with a deadline, mapping expiry to [`AlertError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(AlertError::Timeout(limit)),
    }
}
