//! Bounded-concurrency job supervisor.
//!
//! A fixed pool of workers pulls rendered jobs from a shared queue. Each job
//! runs under its own deadline, covering start, retries and execution. A
//! single [`CancellationToken`] stops the pool from picking up new jobs and
//! terminates the running ones. Whatever happens, a batch of N jobs yields
//! exactly N outcomes.

use crate::backend::{JobBackend, RunningJob};
use crate::error::JobError;
use crate::outcome::JobOutcome;
use crate::state::{JobLifecycle, JobState, JobStatus};
use futures::stream::{self, Stream};
use robot_core::{RunConfig, ToolId};
use robot_tools::JobDescriptor;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum number of retries for a transient start failure.
pub const MAX_START_RETRIES: u32 = 1;

/// Default base delay before retrying a transient start failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Default worker pool size.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default per-job time budget.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default time a job gets to stop before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

type Queue = Arc<Mutex<VecDeque<(usize, JobDescriptor)>>>;

/// Why a job stopped before finishing on its own.
enum Interrupt {
    Cancelled,
    TimedOut,
    Failed(JobError),
}

/// Runs batches of jobs on a [`JobBackend`].
#[derive(Clone)]
pub struct JobSupervisor {
    backend: Arc<dyn JobBackend>,
    max_concurrency: usize,
    job_timeout: Duration,
    grace_period: Duration,
    retry_backoff: Duration,
}

impl JobSupervisor {
    /// Create a supervisor with default limits.
    #[must_use]
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Create a supervisor with the limits of a run.
    #[must_use]
    pub fn from_run_config(backend: Arc<dyn JobBackend>, run: &RunConfig) -> Self {
        Self::new(backend)
            .with_max_concurrency(run.max_concurrency)
            .with_job_timeout(run.job_timeout)
            .with_grace_period(run.grace_period)
            .with_retry_backoff(run.start_retry_backoff)
    }

    /// Set the worker pool size. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the per-job time budget.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the grace period granted to a job being stopped.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the base delay before retrying a transient start failure.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Run every job and return one outcome per job.
    ///
    /// Outcomes are in completion order. Never fails: cancellation, timeouts
    /// and backend errors are all reported as outcomes.
    pub async fn run_batch(
        &self,
        jobs: Vec<JobDescriptor>,
        cancel: CancellationToken,
    ) -> Vec<JobOutcome> {
        self.spawn_batch(jobs, cancel).finish().await
    }

    /// Start a batch in the background and return a handle streaming its
    /// outcomes as they complete.
    ///
    /// Dropping the handle does not stop the batch; cancel the token for that.
    #[must_use]
    pub fn spawn_batch(&self, jobs: Vec<JobDescriptor>, cancel: CancellationToken) -> BatchHandle {
        let tools: Vec<ToolId> = jobs.iter().map(|j| j.tool_id.clone()).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = tokio::spawn(self.clone().coordinate(jobs, cancel, tx));

        BatchHandle {
            outcomes: rx,
            coordinator: Some(coordinator),
            unreported: tools,
        }
    }

    async fn coordinate(
        self,
        jobs: Vec<JobDescriptor>,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<JobOutcome>,
    ) {
        let tools: Vec<ToolId> = jobs.iter().map(|j| j.tool_id.clone()).collect();
        let queue: Queue = Arc::new(Mutex::new(jobs.into_iter().enumerate().collect()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let pool = self.max_concurrency.min(tools.len());
        info!(jobs = tools.len(), workers = pool, "starting batch");

        let mut workers = JoinSet::new();
        for worker in 0..pool {
            workers.spawn(self.clone().worker(
                worker,
                queue.clone(),
                done_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(done_tx);

        let mut reported = vec![false; tools.len()];
        while let Some((index, outcome)) = done_rx.recv().await {
            reported[index] = true;
            let _ = tx.send(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task ended abnormally");
            }
        }

        for (tool, _) in tools.iter().zip(&reported).filter(|(_, done)| !**done) {
            let outcome = if cancel.is_cancelled() {
                JobOutcome::cancelled(tool.clone())
            } else {
                JobOutcome::failed(tool.clone(), "job was lost by its worker")
            };
            warn!(tool = %tool, status = %outcome.status, "job never reported, filling outcome");
            let _ = tx.send(outcome);
        }

        info!(jobs = tools.len(), cancelled = cancel.is_cancelled(), "batch finished");
    }

    async fn worker(
        self,
        worker: usize,
        queue: Queue,
        done: mpsc::UnboundedSender<(usize, JobOutcome)>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().await.pop_front();
            let Some((index, job)) = next else {
                break;
            };

            let outcome = self.run_job(&job, &cancel).await;
            if done.send((index, outcome)).is_err() {
                break;
            }
        }
        debug!(worker, "worker exiting");
    }

    /// Run a single job to a terminal state.
    pub async fn run_job(&self, job: &JobDescriptor, cancel: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        let deadline = started + self.job_timeout;
        let mut lifecycle = JobLifecycle::new(job.tool_id.clone());

        if cancel.is_cancelled() {
            return self.finish(
                job,
                lifecycle,
                JobStatus::Cancelled,
                None,
                Some("cancelled before start".to_string()),
                started,
            );
        }

        info!(tool = %job.tool_id, kind = job.kind(), "starting job");

        let start = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = sleep_until(deadline) => Err(Interrupt::TimedOut),
            result = self.start_with_retry(job, &mut lifecycle) => result.map_err(Interrupt::Failed),
        };

        let mut running = match start {
            Ok(running) => running,
            Err(Interrupt::Cancelled) => {
                return self.finish(
                    job,
                    lifecycle,
                    JobStatus::Cancelled,
                    None,
                    Some("cancelled while starting".to_string()),
                    started,
                );
            }
            Err(Interrupt::TimedOut) => {
                return self.finish(
                    job,
                    lifecycle,
                    JobStatus::TimedOut,
                    None,
                    Some(format!("timed out after {:?} while starting", self.job_timeout)),
                    started,
                );
            }
            Err(Interrupt::Failed(e)) => {
                return self.finish(
                    job,
                    lifecycle,
                    JobStatus::Failed,
                    None,
                    Some(e.to_string()),
                    started,
                );
            }
        };

        advance(&mut lifecycle, JobState::Running);

        let waited = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = sleep_until(deadline) => Err(Interrupt::TimedOut),
            result = running.wait() => result.map_err(Interrupt::Failed),
        };

        match waited {
            Ok(report) if report.success => {
                let exists = tokio::fs::try_exists(&job.output_path)
                    .await
                    .unwrap_or(false);
                if exists {
                    self.finish(
                        job,
                        lifecycle,
                        JobStatus::Succeeded,
                        Some(job.output_path.clone()),
                        None,
                        started,
                    )
                } else {
                    warn!(
                        tool = %job.tool_id,
                        path = %job.output_path.display(),
                        "job succeeded without producing its output file"
                    );
                    self.finish(
                        job,
                        lifecycle,
                        JobStatus::Succeeded,
                        None,
                        Some(format!("no output file at {}", job.output_path.display())),
                        started,
                    )
                }
            }
            Ok(report) => {
                let detail = match &report.detail {
                    Some(extra) => format!("{}: {extra}", report.describe()),
                    None => report.describe(),
                };
                self.finish(job, lifecycle, JobStatus::Failed, None, Some(detail), started)
            }
            Err(Interrupt::Cancelled) => {
                self.terminate(job, running.as_mut()).await;
                discard_partial_output(job).await;
                self.finish(
                    job,
                    lifecycle,
                    JobStatus::Cancelled,
                    None,
                    Some("cancelled while running".to_string()),
                    started,
                )
            }
            Err(Interrupt::TimedOut) => {
                self.terminate(job, running.as_mut()).await;
                discard_partial_output(job).await;
                let err = JobError::Timeout {
                    tool: job.tool_id.clone(),
                    after: self.job_timeout,
                };
                self.finish(
                    job,
                    lifecycle,
                    JobStatus::TimedOut,
                    None,
                    Some(err.to_string()),
                    started,
                )
            }
            Err(Interrupt::Failed(e)) => {
                self.terminate(job, running.as_mut()).await;
                self.finish(
                    job,
                    lifecycle,
                    JobStatus::Failed,
                    None,
                    Some(e.to_string()),
                    started,
                )
            }
        }
    }

    /// Start a job, retrying transient failures with exponential backoff.
    async fn start_with_retry(
        &self,
        job: &JobDescriptor,
        lifecycle: &mut JobLifecycle,
    ) -> Result<Box<dyn RunningJob>, JobError> {
        let mut retries = 0;
        loop {
            advance(lifecycle, JobState::Starting);

            match self.backend.start(job).await {
                Ok(running) => return Ok(running),
                Err(e) if e.is_transient() && retries < MAX_START_RETRIES => {
                    let delay = self.retry_backoff * 2u32.pow(retries);
                    retries += 1;
                    warn!(
                        tool = %job.tool_id,
                        attempt = retries,
                        max_retries = MAX_START_RETRIES,
                        ?delay,
                        error = %e,
                        "transient start failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn terminate(&self, job: &JobDescriptor, running: &mut dyn RunningJob) {
        debug!(tool = %job.tool_id, grace = ?self.grace_period, "terminating job");
        if let Err(e) = running.terminate(self.grace_period).await {
            error!(tool = %job.tool_id, error = %e, "failed to terminate job cleanly");
        }
    }

    fn finish(
        &self,
        job: &JobDescriptor,
        mut lifecycle: JobLifecycle,
        status: JobStatus,
        output_path: Option<PathBuf>,
        error_detail: Option<String>,
        started: Instant,
    ) -> JobOutcome {
        advance(&mut lifecycle, JobState::Done(status));
        let duration = started.elapsed();

        match status {
            JobStatus::Succeeded => info!(
                tool = %job.tool_id,
                ?duration,
                output = ?output_path,
                "job succeeded"
            ),
            _ => warn!(
                tool = %job.tool_id,
                status = %status,
                ?duration,
                detail = error_detail.as_deref().unwrap_or(""),
                "job did not succeed"
            ),
        }

        JobOutcome {
            tool_id: job.tool_id.clone(),
            status,
            output_path,
            error_detail,
            duration,
            attempts: lifecycle.start_attempts(),
        }
    }
}

/// Remove whatever an interrupted job wrote to its output file.
async fn discard_partial_output(job: &JobDescriptor) {
    match tokio::fs::remove_file(&job.output_path).await {
        Ok(()) => debug!(
            tool = %job.tool_id,
            path = %job.output_path.display(),
            "discarded partial output"
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(tool = %job.tool_id, error = %e, "cannot discard partial output"),
    }
}

fn advance(lifecycle: &mut JobLifecycle, next: JobState) {
    if let Err(e) = lifecycle.transition(next) {
        error!(error = %e, "ignoring illegal job transition");
    }
}

/// Live view of a running batch.
pub struct BatchHandle {
    outcomes: mpsc::UnboundedReceiver<JobOutcome>,
    coordinator: Option<JoinHandle<()>>,
    unreported: Vec<ToolId>,
}

impl BatchHandle {
    /// Number of jobs whose outcome has not been received yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.unreported.len()
    }

    /// Wait for the next outcome. Returns `None` once every outcome has been
    /// delivered.
    pub async fn next(&mut self) -> Option<JobOutcome> {
        let outcome = self.outcomes.recv().await?;
        if let Some(pos) = self.unreported.iter().position(|t| t == &outcome.tool_id) {
            self.unreported.swap_remove(pos);
        }
        Some(outcome)
    }

    /// Turn the handle into a stream of outcomes.
    pub fn into_stream(self) -> impl Stream<Item = JobOutcome> {
        stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|outcome| (outcome, handle))
        })
    }

    /// Wait for the batch to end and collect every outcome not yet received.
    pub async fn finish(mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::with_capacity(self.unreported.len());
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }

        if let Some(coordinator) = self.coordinator.take() {
            if let Err(e) = coordinator.await {
                error!(error = %e, "batch coordinator ended abnormally");
            }
        }

        for tool in self.unreported.drain(..) {
            warn!(tool = %tool, "batch ended without an outcome, marking failed");
            outcomes.push(JobOutcome::failed(tool, "supervisor stopped unexpectedly"));
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_constants() {
        const _: () = assert!(MAX_START_RETRIES == 1);
        assert_eq!(DEFAULT_RETRY_BACKOFF, Duration::from_secs(2));
        assert!(DEFAULT_GRACE_PERIOD < DEFAULT_JOB_TIMEOUT);
    }

    #[test]
    fn test_concurrency_floor() {
        struct NoBackend;

        #[async_trait::async_trait]
        impl JobBackend for NoBackend {
            async fn start(&self, job: &JobDescriptor) -> crate::Result<Box<dyn RunningJob>> {
                Err(JobError::InvalidDescriptor {
                    tool: job.tool_id.clone(),
                    reason: "no backend".to_string(),
                })
            }
        }

        let supervisor = JobSupervisor::new(Arc::new(NoBackend)).with_max_concurrency(0);
        assert_eq!(supervisor.max_concurrency, 1);
    }
}
