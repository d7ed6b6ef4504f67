//! Human-readable report of a finished run.

use crate::artifacts::ArtifactPaths;
use chrono::{DateTime, Utc};
use robot_aggregate::ParseWarning;
use robot_db::UpsertStats;
use robot_supervisor::{BatchSummary, JobOutcome};
use std::fmt;
use std::time::Duration;

/// Which pipeline produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Tools were executed
    Gather,
    /// Existing output files were re-aggregated
    Rebuild,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "gather",
            Self::Rebuild => "rebuild",
        }
    }
}

/// Everything a run did, in registry order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Pipeline that ran
    pub mode: RunMode,
    /// Target domain
    pub domain: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// One outcome per selected tool
    pub outcomes: Vec<JobOutcome>,
    /// Outcome counts
    pub batch: BatchSummary,
    /// What the store write did
    pub upsert: UpsertStats,
    /// Rows stored for the domain after the write
    pub records: usize,
    /// Lines that could not be turned into records
    pub warnings: Vec<ParseWarning>,
    /// Artifact locations
    pub artifacts: ArtifactPaths,
    /// Whether the run was cancelled before every job finished
    pub cancelled: bool,
}

impl RunSummary {
    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} ({}, {:.1}s){}",
            self.mode.as_str(),
            self.domain,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.elapsed().as_secs_f64(),
            if self.cancelled { " [cancelled]" } else { "" },
        )?;

        let width = self
            .outcomes
            .iter()
            .map(|o| o.tool_id.as_str().len())
            .max()
            .unwrap_or(0);
        for outcome in &self.outcomes {
            let detail = match (&outcome.output_path, &outcome.error_detail) {
                (_, Some(detail)) => detail.clone(),
                (Some(path), None) => path.display().to_string(),
                (None, None) => String::new(),
            };
            writeln!(
                f,
                "  {:<width$}  {:<9}  {:>7.1}s  {}",
                outcome.tool_id.as_str(),
                outcome.status.as_str(),
                outcome.duration.as_secs_f64(),
                detail,
            )?;
        }

        writeln!(
            f,
            "jobs: {} total, {} succeeded, {} failed, {} timed out, {} cancelled",
            self.batch.total,
            self.batch.succeeded,
            self.batch.failed,
            self.batch.timed_out,
            self.batch.cancelled,
        )?;
        writeln!(
            f,
            "records: {} stored ({} new, {} updated, {} unchanged), {} parse warnings",
            self.records,
            self.upsert.inserted,
            self.upsert.updated,
            self.upsert.unchanged,
            self.warnings.len(),
        )?;
        write!(f, "hostnames: {}", self.artifacts.hostnames.display())
    }
}
