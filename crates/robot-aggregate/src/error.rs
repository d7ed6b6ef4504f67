//! Error types for output aggregation.

use robot_core::RobotError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while aggregating tool output.
///
/// Per-line problems are not errors; they become
/// [`ParseWarning`](crate::ParseWarning)s.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The target domain is not a valid DNS name
    #[error("invalid target domain: {0}")]
    InvalidDomain(String),

    /// An output file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl From<AggregateError> for RobotError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::InvalidDomain(msg) => Self::Validation(msg),
            AggregateError::Read { source, .. } => Self::Io(source),
        }
    }
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
