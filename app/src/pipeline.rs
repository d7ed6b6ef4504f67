//! The gather, rebuild and dump pipelines.
//!
//! `gather` is the full run: select tools, render jobs, supervise them,
//! aggregate their output, reconcile with what the store already holds,
//! upsert and write artifacts. `rebuild` skips execution and re-reads the
//! output files a previous run left behind.

use crate::artifacts::{write_artifacts, ArtifactPaths};
use crate::context::RunContext;
use crate::summary::{RunMode, RunSummary};
use anyhow::Context;
use chrono::{DateTime, Utc};
use robot_aggregate::{reconcile, Aggregation, Aggregator};
use robot_core::DiscoveryRecord;
use robot_db::UpsertStats;
use robot_supervisor::{BatchSummary, CancellationToken, JobBackend, JobOutcome, JobStatus};
use robot_tools::{render_all, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run every selected tool against the context's domain and store what
/// they found.
///
/// Tool failures never fail the run; they show up in the summary. Errors
/// are returned only for configuration, store and artifact problems.
pub async fn gather(ctx: &RunContext, backend: Arc<dyn JobBackend>) -> anyhow::Result<RunSummary> {
    let started_at = Utc::now();
    ctx.run.validate()?;

    let selected = ctx.registry.select(ctx.run.enabled_tools.as_deref())?;
    info!(domain = %ctx.run.domain, tools = selected.len(), "Starting gather");

    let (jobs, template_failures) = render_all(&selected, &ctx.run);
    let mut outcomes: Vec<JobOutcome> = template_failures
        .iter()
        .map(|e| {
            warn!(tool = %e.tool(), error = %e, "Tool not started");
            JobOutcome::failed(e.tool().clone(), e.to_string())
        })
        .collect();

    let supervisor = ctx.supervisor(backend);
    outcomes.extend(supervisor.run_batch(jobs, ctx.cancel.clone()).await);
    sort_by_registry(&ctx.registry, &mut outcomes);

    let aggregator = Aggregator::from_specs(&ctx.run.domain, &selected)?;
    let aggregation = {
        let outcomes = outcomes.clone();
        tokio::task::spawn_blocking(move || aggregator.aggregate(&outcomes))
            .await
            .context("aggregation task failed")?
    };

    finish(ctx, RunMode::Gather, started_at, outcomes, aggregation).await
}

/// Re-aggregate the output files already on disk for the selected tools,
/// without running anything.
///
/// A tool whose output file exists is reported as succeeded; one without is
/// reported as failed.
pub async fn rebuild(ctx: &RunContext) -> anyhow::Result<RunSummary> {
    let started_at = Utc::now();
    let selected = ctx.registry.select(ctx.run.enabled_tools.as_deref())?;
    info!(domain = %ctx.run.domain, tools = selected.len(), "Starting rebuild");

    let outcomes: Vec<JobOutcome> = selected
        .iter()
        .map(|spec| {
            let path = ctx
                .run
                .tool_output_dir(&spec.output_subdir)
                .join(&spec.output_file);
            if path.is_file() {
                JobOutcome {
                    tool_id: spec.id.clone(),
                    status: JobStatus::Succeeded,
                    output_path: Some(path),
                    error_detail: None,
                    duration: Duration::ZERO,
                    attempts: 0,
                }
            } else {
                JobOutcome::failed(
                    spec.id.clone(),
                    format!("no output file at {}", path.display()),
                )
            }
        })
        .collect();

    let aggregator = Aggregator::from_specs(&ctx.run.domain, &selected)?;
    let aggregation = {
        let outcomes = outcomes.clone();
        tokio::task::spawn_blocking(move || aggregator.aggregate(&outcomes))
            .await
            .context("aggregation task failed")?
    };

    finish(ctx, RunMode::Rebuild, started_at, outcomes, aggregation).await
}

/// Every stored record of the context's domain. Also refreshes the
/// artifacts from the store.
pub async fn dump_db(ctx: &RunContext) -> anyhow::Result<(Vec<DiscoveryRecord>, ArtifactPaths)> {
    let records = ctx.db.dump(&ctx.run.domain).await?;
    let artifacts = write_artifacts(&ctx.run, &records)
        .await
        .context("failed to write artifacts")?;
    info!(domain = %ctx.run.domain, records = records.len(), "Store dumped");
    Ok((records, artifacts))
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("Interrupt received, cancelling run"),
                    Err(e) => warn!(error = %e, "Cannot listen for interrupts, cancelling run"),
                }
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    })
}

async fn finish(
    ctx: &RunContext,
    mode: RunMode,
    started_at: DateTime<Utc>,
    outcomes: Vec<JobOutcome>,
    aggregation: Aggregation,
) -> anyhow::Result<RunSummary> {
    let domain = &ctx.run.domain;
    let upsert = store(ctx, &aggregation.records).await?;

    let stored = ctx.db.dump(domain).await?;
    let artifacts = write_artifacts(&ctx.run, &stored)
        .await
        .context("failed to write artifacts")?;

    let batch = BatchSummary::from_outcomes(&outcomes);
    let summary = RunSummary {
        mode,
        domain: domain.clone(),
        started_at,
        finished_at: Utc::now(),
        batch,
        upsert,
        records: stored.len(),
        warnings: aggregation.warnings,
        artifacts,
        cancelled: ctx.cancel.is_cancelled(),
        outcomes,
    };

    info!(
        domain = %domain,
        succeeded = batch.succeeded,
        failed = batch.failed,
        timed_out = batch.timed_out,
        cancelled = batch.cancelled,
        records = summary.records,
        "Run finished"
    );
    Ok(summary)
}

/// Merge fresh records with the stored ones and upsert the result.
async fn store(ctx: &RunContext, fresh: &[DiscoveryRecord]) -> anyhow::Result<UpsertStats> {
    let domain = &ctx.run.domain;
    if fresh.is_empty() {
        return Ok(UpsertStats::default());
    }

    let prior = ctx.db.dump(domain).await?;
    let merged = reconcile(&prior, fresh);
    Ok(ctx.db.upsert_records(domain, &merged).await?)
}

fn sort_by_registry(registry: &ToolRegistry, outcomes: &mut [JobOutcome]) {
    outcomes.sort_by_key(|o| registry.position(&o.tool_id).unwrap_or(usize::MAX));
}
