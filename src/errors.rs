//! Centralised error type for the relay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Malformed vote payload {0:?}: {1}")]
    MalformedPayload(String, #[source] serde_json::Error),

    #[error("Invalid vote event: {0}")]
    InvalidEvent(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Gave up connecting to {0} after {1} attempts")]
    RetriesExhausted(&'static str, u32, #[source] Box<RelayError>),
}
