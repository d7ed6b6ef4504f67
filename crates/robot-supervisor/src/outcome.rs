//! Terminal job results.

use crate::state::JobStatus;
use robot_core::ToolId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result of executing one job. Produced exactly once per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Tool the job ran
    pub tool_id: ToolId,
    /// Terminal status
    pub status: JobStatus,
    /// Output file, present only for a succeeded job whose file exists
    pub output_path: Option<PathBuf>,
    /// Failure description
    pub error_detail: Option<String>,
    /// Wall-clock time from pickup to terminal state
    pub duration: Duration,
    /// Number of start attempts
    pub attempts: u32,
}

impl JobOutcome {
    /// A failed outcome for a job that never reached the supervisor, e.g.
    /// because its template did not render.
    #[must_use]
    pub fn failed(tool_id: ToolId, detail: impl Into<String>) -> Self {
        Self {
            tool_id,
            status: JobStatus::Failed,
            output_path: None,
            error_detail: Some(detail.into()),
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    /// A cancelled outcome for a job that never started.
    #[must_use]
    pub fn cancelled(tool_id: ToolId) -> Self {
        Self {
            tool_id,
            status: JobStatus::Cancelled,
            output_path: None,
            error_detail: Some("cancelled before start".to_string()),
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    /// Whether the job succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Per-status counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of outcomes
    pub total: usize,
    /// Succeeded jobs
    pub succeeded: usize,
    /// Failed jobs
    pub failed: usize,
    /// Timed-out jobs
    pub timed_out: usize,
    /// Cancelled jobs
    pub cancelled: usize,
}

impl BatchSummary {
    /// Count outcomes by status.
    #[must_use]
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, outcome| {
            acc.total += 1;
            match outcome.status {
                JobStatus::Succeeded => acc.succeeded += 1,
                JobStatus::Failed => acc.failed += 1,
                JobStatus::TimedOut => acc.timed_out += 1,
                JobStatus::Cancelled => acc.cancelled += 1,
            }
            acc
        })
    }

    /// Whether every job succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs: {} succeeded, {} failed, {} timed out, {} cancelled",
            self.total, self.succeeded, self.failed, self.timed_out, self.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(s: &str) -> ToolId {
        ToolId::new(s).unwrap()
    }

    #[test]
    fn test_summary_counts() {
        let mut ok = JobOutcome::failed(tool("amass"), "x");
        ok.status = JobStatus::Succeeded;
        let outcomes = vec![
            ok,
            JobOutcome::failed(tool("knock"), "exit code 1"),
            JobOutcome::cancelled(tool("subfinder")),
        ];

        let summary = BatchSummary::from_outcomes(&outcomes);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert!(!summary.all_succeeded());
        assert_eq!(
            summary.to_string(),
            "3 jobs: 1 succeeded, 1 failed, 0 timed out, 1 cancelled"
        );
    }
}
