//! Error types for the sniper bot system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("RPC error: {message}")]
    Rpc { message: String, code: Option<i64> },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid token data: {0}")]
    InvalidToken(String),
}

impl Error {
    /// Whether this error is a transient transport failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::WebSocket(_) | Error::Timeout(_) | Error::RateLimited(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
