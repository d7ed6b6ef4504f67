//! Robot Supervisor - Bounded-concurrency job execution.
//!
//! Runs rendered [`robot_tools::JobDescriptor`]s on a fixed-size worker pool,
//! enforcing a per-job time budget, retrying transient start failures once,
//! and honouring a shared cancellation token. Every job ends in exactly one
//! [`JobOutcome`], and no process outlives its job.
//!
//! # Architecture
//!
//! - **Supervisor** ([`supervisor`]): worker pool, deadlines, retry, batch handle
//! - **Backends** ([`backend`]): the `JobBackend` / `RunningJob` seam
//! - **Processes** ([`process`]): docker CLI and host-process backend
//! - **Lifecycle** ([`state`]): per-job state machine
//! - **Outcomes** ([`outcome`]): terminal results and batch summaries

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod backend;
pub mod error;
pub mod outcome;
pub mod process;
pub mod state;
pub mod supervisor;

// Re-export commonly used types
pub use backend::{ExitReport, JobBackend, RunningJob};
pub use error::{JobError, Result};
pub use outcome::{BatchSummary, JobOutcome};
pub use process::ProcessBackend;
pub use state::{JobLifecycle, JobState, JobStatus, TransitionError};
pub use supervisor::{BatchHandle, JobSupervisor, MAX_START_RETRIES};
pub use tokio_util::sync::CancellationToken;
