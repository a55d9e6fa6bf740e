use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Integrity mismatch for {key}: stored {stored:?}, computed {computed}")]
    IntegrityMismatch {
        key: String,
        stored: Option<String>,
        computed: String,
    },

    #[error("Cannot anchor an empty batch")]
    EmptyBatch,

    #[error("An anchoring cycle is already running")]
    CycleInProgress,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuditError {
    /// Whether a caller may retry the operation unchanged.
    /// InsufficientFunds is non-retryable: it needs operator action, and
    /// busy-retrying a doomed publish helps nobody.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuditError::Unavailable(_) | AuditError::Database(_) | AuditError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
