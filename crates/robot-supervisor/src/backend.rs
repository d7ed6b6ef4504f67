//! Job execution capability.
//!
//! The supervisor only knows how to start a job, wait for it and stop it.
//! Everything runtime-specific (container CLI, subprocesses) lives behind
//! [`JobBackend`].

use crate::error::Result;
use async_trait::async_trait;
use robot_tools::JobDescriptor;
use std::time::Duration;

/// How a started job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Whether the job reported success
    pub success: bool,
    /// Exit code, if the job exited normally
    pub code: Option<i32>,
    /// Extra context for failures, such as the tail of the job's log
    pub detail: Option<String>,
}

impl ExitReport {
    /// A successful exit.
    #[must_use]
    pub fn success() -> Self {
        Self {
            success: true,
            code: Some(0),
            detail: None,
        }
    }

    /// An unsuccessful exit with the given code.
    #[must_use]
    pub fn failure(code: Option<i32>, detail: Option<String>) -> Self {
        Self {
            success: false,
            code,
            detail,
        }
    }

    /// Short description of the exit, e.g. `exit code 2`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A started job.
///
/// `wait` must be cancel-safe: the supervisor races it against the job's
/// deadline and the batch's cancellation token, and calls `terminate` after
/// dropping an unfinished `wait`.
#[async_trait]
pub trait RunningJob: Send {
    /// Wait for the job to finish on its own.
    async fn wait(&mut self) -> Result<ExitReport>;

    /// Stop the job and reclaim every resource it holds.
    ///
    /// The job gets `grace` to exit after a polite request before it is
    /// killed. Must not return while any process of the job is still alive.
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
}

/// Something that can start jobs.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Start `job`.
    ///
    /// Dropping the returned future before it resolves must not leave
    /// anything running.
    ///
    /// # Errors
    /// `JobError::Start` with `transient = true` for failures worth retrying,
    /// `JobError::InvalidDescriptor` for descriptors that can never run.
    async fn start(&self, job: &JobDescriptor) -> Result<Box<dyn RunningJob>>;
}
