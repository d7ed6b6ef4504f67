//! Robot Application Shell
//!
//! Thin orchestration layer that wires the tool registry, job supervisor,
//! output aggregator and record store into runs against one domain.
//! Business logic lives in the `crates/` directory.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod artifacts;
pub mod context;
pub mod pipeline;
pub mod summary;

// Re-export commonly used types
pub use artifacts::{write_artifacts, ArtifactPaths};
pub use context::{process_backend, RunContext};
pub use pipeline::{cancel_on_interrupt, dump_db, gather, rebuild};
pub use summary::{RunMode, RunSummary};

use robot_core::AppConfig;
use tracing::info;

/// Initialize tracing subscriber for logging.
///
/// Honors `RUST_LOG`. Calling it again is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,robot=debug"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// Gather `domain` with the configuration from the environment and the
/// process backend, cancelling on Ctrl-C.
pub async fn run(domain: &str) -> anyhow::Result<RunSummary> {
    init_tracing();
    info!("Starting Robot v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env()?;
    let ctx = RunContext::from_config(&config, domain).await?;
    let interrupt = cancel_on_interrupt(ctx.cancel.clone());

    let result = gather(&ctx, process_backend(&config)).await;

    interrupt.abort();
    if let Ok(db) = std::sync::Arc::try_unwrap(ctx.db) {
        db.close().await;
    }
    result
}
