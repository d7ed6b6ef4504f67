//! Application configuration.
//!
//! One TOML file with `[general]`, `[supervisor]` and `[network]` sections,
//! every field optional. `ROBOT_*` variables override the network and limit
//! settings. [`AppConfig::run_config`] turns it into a [`RunConfig`] for one
//! target domain.

use crate::error::{ConfigError, ConfigResult};
use crate::run::RunConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by every run, read from `~/.config/robot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Paths for outputs, the tool registry and the record store
    pub general: GeneralConfig,
    /// Job execution limits
    pub supervisor: SupervisorConfig,
    /// Proxy, DNS and container networking
    pub network: NetworkConfig,
}

impl AppConfig {
    /// Read the config at the XDG path; defaults when there is none.
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    ///
    /// Unlike [`AppConfig::load`], a missing file is an error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `ROBOT_PROXY`: Proxy handed to every tool
    /// - `ROBOT_DNS`: DNS server handed to every tool
    /// - `ROBOT_MAX_CONCURRENCY`: Override the worker pool size
    /// - `ROBOT_JOB_TIMEOUT_SECS`: Override the per-job timeout
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `ROBOT_*` environment overrides to an already loaded config.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROBOT_PROXY") {
            tracing::debug!("Override network.proxy from env");
            self.network.proxy = Some(val).filter(|v| !v.is_empty());
        }

        if let Ok(val) = std::env::var("ROBOT_DNS") {
            tracing::debug!("Override network.dns from env: {}", val);
            self.network.dns = Some(val).filter(|v| !v.is_empty());
        }

        if let Ok(val) = std::env::var("ROBOT_MAX_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                self.supervisor.max_concurrency = n;
                tracing::debug!("Override supervisor.max_concurrency from env: {}", n);
            }
        }

        if let Ok(val) = std::env::var("ROBOT_JOB_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.supervisor.job_timeout_secs = secs;
                tracing::debug!("Override supervisor.job_timeout_secs from env: {}", secs);
            }
        }
    }

    /// Write the config to the XDG path.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let config_dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Build the validated per-run configuration for `domain`.
    ///
    /// The run's output root is `<general.output_root>/<domain>`.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the domain is not a valid DNS
    /// name or a limit is out of range.
    pub fn run_config(&self, domain: &str) -> ConfigResult<RunConfig> {
        let domain = crate::normalize::normalize_domain(domain).map_err(|e| {
            ConfigError::InvalidValue {
                field: "domain".to_string(),
                reason: e.to_string(),
            }
        })?;

        let output_root = self.general.output_root.join(&domain);
        let mut run = RunConfig::new(&domain, output_root)?;
        run.proxy.clone_from(&self.network.proxy);
        run.dns.clone_from(&self.network.dns);
        run.network_mode.clone_from(&self.network.network_mode);
        run.max_concurrency = self.supervisor.max_concurrency;
        run.job_timeout = Duration::from_secs(self.supervisor.job_timeout_secs);
        run.grace_period = Duration::from_secs(self.supervisor.grace_period_secs);
        run.start_retry_backoff = Duration::from_millis(self.supervisor.start_retry_backoff_ms);

        run.validate()?;
        Ok(run)
    }

    /// Path of the record store database.
    ///
    /// Uses `general.database_path` when set, else `<data_dir>/robot.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.general.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("robot.db")),
        }
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/robot/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "robot", "robot").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/robot`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "robot", "robot").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root under which each domain gets its own output tree
    pub output_root: PathBuf,
    /// Tool registry file, or a directory of registry files
    pub registry_path: PathBuf,
    /// Record store location (defaults to the XDG data directory)
    pub database_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            registry_path: PathBuf::from("tools/tools.toml"),
            database_path: None,
        }
    }
}

/// Job execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Worker pool size
    pub max_concurrency: usize,
    /// Wall-clock limit for a single job, start and retries included
    pub job_timeout_secs: u64,
    /// Time a job gets to stop after being asked before it is killed
    pub grace_period_secs: u64,
    /// Base delay before retrying a transient start failure
    pub start_retry_backoff_ms: u64,
    /// Container CLI used by the process backend
    pub docker_bin: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            job_timeout_secs: 3600,
            grace_period_secs: 10,
            start_retry_backoff_ms: 2000,
            docker_bin: "docker".to_string(),
        }
    }
}

/// Proxy, DNS and container networking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP(S) proxy URL passed to tools
    pub proxy: Option<String>,
    /// DNS server passed to tools
    pub dns: Option<String>,
    /// Container network mode for builds and runs
    pub network_mode: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            dns: None,
            network_mode: "host".to_string(),
        }
    }
}
