//! Error types for job execution.

use robot_core::{RobotError, ToolId};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while starting or running a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job could not be started (image build failed, program missing, ...)
    #[error("failed to start {tool}: {reason}")]
    Start {
        /// Tool being started
        tool: ToolId,
        /// What went wrong
        reason: String,
        /// Whether retrying may help (network pull failures and the like)
        transient: bool,
    },

    /// The descriptor cannot be executed as given
    #[error("invalid job descriptor for {tool}: {reason}")]
    InvalidDescriptor {
        /// Tool the descriptor belongs to
        tool: ToolId,
        /// What is wrong with it
        reason: String,
    },

    /// The job exceeded its time budget and was terminated
    #[error("{tool} timed out after {after:?}")]
    Timeout {
        /// Tool that timed out
        tool: ToolId,
        /// Budget that was exceeded
        after: Duration,
    },

    /// I/O error while preparing, running or stopping a job
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Whether a start failure is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Start { transient: true, .. })
    }
}

impl From<JobError> for RobotError {
    fn from(err: JobError) -> Self {
        Self::Job(err.to_string())
    }
}

/// Result type for job operations.
pub type Result<T> = std::result::Result<T, JobError>;
