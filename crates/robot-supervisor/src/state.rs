//! Per-job lifecycle state machine.
//!
//! ```text
//! Pending -> Starting -> Running -> Succeeded | Failed | TimedOut
//!               |  ^                      \
//!               |  '-- retry               '-> Cancelled
//!               '-> Failed | TimedOut | Cancelled
//! Pending -> Cancelled
//! ```

use robot_core::ToolId;
use std::fmt;
use std::time::Instant;

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobStatus {
    /// Ran to completion with a success exit
    Succeeded,
    /// Could not start, or exited unsuccessfully
    Failed,
    /// Exceeded its time budget and was terminated
    TimedOut,
    /// Stopped, or never started, because of cancellation
    Cancelled,
}

impl JobStatus {
    /// Lower-case label used in logs and summaries.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any state of a job, terminal or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued, waiting for a worker
    Pending,
    /// Being started (image build, process spawn)
    Starting,
    /// Started and not yet finished
    Running,
    /// Finished
    Done(JobStatus),
}

impl JobState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Whether moving from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobStatus::{Cancelled, Failed, Succeeded, TimedOut};

        match (self, next) {
            (Self::Pending, Self::Starting | Self::Done(Cancelled))
            | (
                Self::Starting,
                Self::Starting | Self::Running | Self::Done(Failed | TimedOut | Cancelled),
            )
            | (Self::Running, Self::Done(Succeeded | Failed | TimedOut | Cancelled)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Done(status) => status.fmt(f),
        }
    }
}

/// An illegal state change was requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{tool}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// Job's tool
    pub tool: ToolId,
    /// Current state
    pub from: JobState,
    /// Rejected state
    pub to: JobState,
}

/// Ordered record of one job's states.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    tool: ToolId,
    history: Vec<(JobState, Instant)>,
}

impl JobLifecycle {
    /// A new lifecycle in `Pending`.
    #[must_use]
    pub fn new(tool: ToolId) -> Self {
        Self {
            tool,
            history: vec![(JobState::Pending, Instant::now())],
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.history
            .last()
            .map_or(JobState::Pending, |(state, _)| *state)
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns `TransitionError` and leaves the state unchanged if the move is
    /// illegal.
    pub fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(TransitionError {
                tool: self.tool.clone(),
                from: current,
                to: next,
            });
        }

        tracing::debug!(tool = %self.tool, from = %current, to = %next, "job state");
        self.history.push((next, Instant::now()));
        Ok(())
    }

    /// States visited so far, oldest first.
    #[must_use]
    pub fn states(&self) -> Vec<JobState> {
        self.history.iter().map(|(state, _)| *state).collect()
    }

    /// Number of times the job entered `Starting`.
    #[must_use]
    pub fn start_attempts(&self) -> u32 {
        let count = self
            .history
            .iter()
            .filter(|(state, _)| *state == JobState::Starting)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}
