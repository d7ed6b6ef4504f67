//! Everything one run needs, assembled once.

use anyhow::Context;
use robot_core::{AppConfig, RunConfig};
use robot_db::Database;
use robot_supervisor::{CancellationToken, JobBackend, JobSupervisor, ProcessBackend};
use robot_tools::{ToolLoader, ToolRegistry};
use std::sync::Arc;

/// Shared state of a run against one domain.
#[derive(Clone)]
pub struct RunContext {
    /// Validated per-run configuration
    pub run: RunConfig,
    /// Loaded tool registry
    pub registry: ToolRegistry,
    /// Record store
    pub db: Arc<Database>,
    /// Cancels the whole run
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Assemble a context from already-built parts.
    #[must_use]
    pub fn new(run: RunConfig, registry: ToolRegistry, db: Arc<Database>) -> Self {
        Self {
            run,
            registry,
            db,
            cancel: CancellationToken::new(),
        }
    }

    /// Load the registry and open the record store named by `config`.
    pub async fn from_config(config: &AppConfig, domain: &str) -> anyhow::Result<Self> {
        let run = config
            .run_config(domain)
            .with_context(|| format!("invalid run configuration for {domain}"))?;

        let loader = ToolLoader::new(&config.general.registry_path).with_context(|| {
            format!(
                "cannot open tool registry {}",
                config.general.registry_path.display()
            )
        })?;
        let registry = ToolRegistry::load(&loader).context("failed to load tool registry")?;

        let db_path = config.database_path()?;
        let db = Database::open(&db_path)
            .await
            .with_context(|| format!("cannot open record store {}", db_path.display()))?;
        db.run_migrations().await?;

        tracing::info!(
            domain = %run.domain,
            tools = registry.len(),
            database = %db_path.display(),
            "Run context ready"
        );
        Ok(Self::new(run, registry, Arc::new(db)))
    }

    /// Use `cancel` instead of the context's own token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Supervisor configured with this run's limits.
    #[must_use]
    pub fn supervisor(&self, backend: Arc<dyn JobBackend>) -> JobSupervisor {
        JobSupervisor::from_run_config(backend, &self.run)
    }
}

/// The process backend configured from `config`.
#[must_use]
pub fn process_backend(config: &AppConfig) -> Arc<dyn JobBackend> {
    Arc::new(ProcessBackend::new().with_docker_bin(&config.supervisor.docker_bin))
}
