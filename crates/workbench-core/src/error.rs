//! Error types for the workbench.

use std::fmt;
use thiserror::Error;

/// Top-level workbench error.
#[derive(Error, Debug)]
pub enum WorkbenchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("insufficient data: need {required} samples, have {available}")]
    Insufficient { required: usize, available: usize },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkbenchError {
    /// Short machine-readable tag for logs and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkbenchError::InvalidArgument(_) => "invalid_argument",
            WorkbenchError::NotFound(_) => "not_found",
            WorkbenchError::NoData(_) => "no_data",
            WorkbenchError::Insufficient { .. } => "insufficient",
            WorkbenchError::InvalidRange(_) => "invalid_range",
            WorkbenchError::Broker(BrokerError::Unavailable(_)) => "broker_unavailable",
            WorkbenchError::Broker(_) => "broker",
            WorkbenchError::Store(_) => "store",
            WorkbenchError::Upstream(_) => "upstream",
            WorkbenchError::Internal(_) => "internal",
        }
    }
}

/// Broker adapter errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Terminal not reachable, not initialized, or inside the init cooldown.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("broker error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Whether the error means the terminal connection itself is gone.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Discriminator carried by [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    InvalidArgument,
    Connection,
    Query,
    Decode,
    Schema,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::InvalidArgument => "invalid_argument",
            StoreErrorKind::Connection => "connection",
            StoreErrorKind::Query => "query",
            StoreErrorKind::Decode => "decode",
            StoreErrorKind::Schema => "schema",
        };
        write!(f, "{}", s)
    }
}

/// Single error tag surfaced by every store operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::InvalidArgument, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Query, message)
    }
}

/// Result type alias for workbench operations.
pub type WorkbenchResult<T> = Result<T, WorkbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = WorkbenchError::from(BrokerError::Unavailable("cooldown".into()));
        assert_eq!(err.kind(), "broker_unavailable");

        let err = WorkbenchError::from(StoreError::invalid_argument("limit must be >= 1"));
        assert_eq!(err.kind(), "store");
        assert_eq!(err.to_string(), "store error: invalid_argument: limit must be >= 1");
    }

    #[test]
    fn test_insufficient_message() {
        let err = WorkbenchError::Insufficient {
            required: 12,
            available: 5,
        };
        assert_eq!(err.to_string(), "insufficient data: need 12 samples, have 5");
    }
}
