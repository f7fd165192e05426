//! Error types for the analytics pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Ingestion errors
    #[error("Invalid swap: {0}")]
    InvalidSwap(String),

    #[error("Duplicate signature: {0}")]
    DuplicateSignature(String),

    #[error("Unknown DEX program: {0}")]
    UnknownProgram(String),

    #[error("Invalid pool state for {pool}: {reason}")]
    InvalidPoolState { pool: String, reason: String },

    // Feed errors
    #[error("Feed connection failed: {0}")]
    FeedConnection(String),

    #[error("Feed disconnected")]
    FeedDisconnected,

    #[error("Feed decode error: {0}")]
    FeedDecode(String),

    // Oracle errors
    #[error("Oracle request failed: {0}")]
    Oracle(String),

    #[error("Oracle timeout after {0}ms")]
    OracleTimeout(u64),

    // Pipeline errors
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Event out of window: {0}")]
    OutOfWindow(String),

    // Dataset / replay errors
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Determinism violation: {0}")]
    Determinism(String),

    // Sandbox errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Max concurrent positions reached: {0}")]
    MaxPositionsReached(usize),

    #[error("Position size {requested} exceeds cap {cap}")]
    PositionSizeExceeded { requested: f64, cap: f64 },

    #[error("Insufficient capital: {available} available, {required} required")]
    InsufficientCapital { available: f64, required: f64 },

    // Persistence / report errors
    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Report write failed: {0}")]
    Report(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient external failure)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FeedConnection(_)
                | Error::FeedDisconnected
                | Error::Oracle(_)
                | Error::OracleTimeout(_)
                | Error::Persistence(_)
        )
    }

    /// Check if this error aborts a replay run.
    ///
    /// Per-event data-shape errors are dropped with a counter; determinism
    /// violations and malformed datasets are fatal in replay mode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Determinism(_) | Error::Dataset(_))
    }

    /// Check if this error is a per-event drop (never propagated upward)
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            Error::InvalidSwap(_)
                | Error::DuplicateSignature(_)
                | Error::UnknownProgram(_)
                | Error::InvalidPoolState { .. }
                | Error::OutOfWindow(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from csv errors
impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Report(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::FeedDisconnected.is_retryable());
        assert!(Error::Oracle("timeout".into()).is_retryable());
        assert!(!Error::InvalidSwap("no trader".into()).is_retryable());
        assert!(!Error::Determinism("out of order".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Determinism("dup key".into()).is_fatal());
        assert!(Error::Dataset("txIndex missing".into()).is_fatal());
        assert!(!Error::InvalidSwap("x".into()).is_fatal());
    }

    #[test]
    fn test_droppable_classification() {
        assert!(Error::DuplicateSignature("sig".into()).is_droppable());
        assert!(Error::InvalidPoolState {
            pool: "p".into(),
            reason: "zero reserves".into()
        }
        .is_droppable());
        assert!(!Error::Config("bad".into()).is_droppable());
    }
}
