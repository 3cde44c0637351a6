/// Shared error type used across all AI Hub crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("request queue is full")]
    QueueFull,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store: {0}")]
    Store(String),

    #[error("broadcast: {0}")]
    Broadcast(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
