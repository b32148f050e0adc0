use thiserror::Error;

/// Errors surfaced by conversation/ticket store operations, on either side
/// of the wire.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Transient failures retry on the next poll tick; policy refusals and
    /// validation errors must be surfaced to the user instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum PaydeskError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Other error: {0}")]
    Other(String),
}
