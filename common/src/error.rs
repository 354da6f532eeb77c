use thiserror::Error;

/// Error kinds surfaced by every nbase component.
#[derive(Debug, Error)]
pub enum NbaseError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("database not ready")]
    DatabaseNotReady,

    #[error("database closed")]
    Closed,

    #[error("too many concurrent searches")]
    Overloaded,

    #[error("operation timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NbaseError>;
