//! Database error types.

use robot_core::RobotError;
use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create the database.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// An upsert batch for one domain failed and was rolled back.
    #[error("failed to write records for {domain}: {source}")]
    StoreWrite {
        /// Domain whose batch failed
        domain: String,
        /// Underlying error
        source: sqlx::Error,
    },

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DatabaseError> for RobotError {
    fn from(err: DatabaseError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
