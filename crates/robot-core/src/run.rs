//! The per-run configuration handed explicitly to every stage.

use crate::error::{ConfigError, ConfigResult};
use crate::normalize::normalize_domain;
use crate::types::ToolId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory, relative to the run's output root, holding flat-file summaries.
pub const AGGREGATED_DIR: &str = "aggregated";

/// Hostname summary file name; also the default `infile` for command tools.
pub const AGGREGATED_HOSTNAMES: &str = "aggregated_hostnames.txt";

/// Validated configuration for one run against one domain.
///
/// Built by [`crate::AppConfig::run_config`] or [`RunConfig::new`] and then
/// adjusted with the `with_*` methods. Nothing in the engine reads ambient
/// state; everything a stage needs is in here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Normalized target domain
    pub domain: String,
    /// Output tree for this domain; each tool writes below its own subdirectory
    pub output_root: PathBuf,
    /// Proxy URL; tools render their proxy directives only when set
    pub proxy: Option<String>,
    /// DNS server; tools render their DNS directives only when set
    pub dns: Option<String>,
    /// Free-form flags appended to command tools
    pub extra_flags: String,
    /// Input file for command tools. Defaults to the aggregated hostnames file.
    pub infile: Option<PathBuf>,
    /// Explicit tool selection; `None` means every enabled tool
    pub enabled_tools: Option<Vec<ToolId>>,
    /// Per-tool substitution overrides, applied over the registry defaults
    pub tool_overrides: BTreeMap<ToolId, BTreeMap<String, String>>,
    /// Worker pool size
    pub max_concurrency: usize,
    /// Wall-clock limit for one job
    pub job_timeout: Duration,
    /// Time a job gets to stop before it is killed
    pub grace_period: Duration,
    /// Base delay before retrying a transient start failure
    pub start_retry_backoff: Duration,
    /// Container network mode
    pub network_mode: String,
}

impl RunConfig {
    /// Create a run configuration with default limits.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if `domain` is not a valid DNS name.
    pub fn new(domain: &str, output_root: impl Into<PathBuf>) -> ConfigResult<Self> {
        let domain = normalize_domain(domain).map_err(|e| ConfigError::InvalidValue {
            field: "domain".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            domain,
            output_root: output_root.into(),
            proxy: None,
            dns: None,
            extra_flags: String::new(),
            infile: None,
            enabled_tools: None,
            tool_overrides: BTreeMap::new(),
            max_concurrency: 4,
            job_timeout: Duration::from_secs(3600),
            grace_period: Duration::from_secs(10),
            start_retry_backoff: Duration::from_secs(2),
            network_mode: "host".to_string(),
        })
    }

    /// Set the proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set the DNS server.
    #[must_use]
    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns = Some(dns.into());
        self
    }

    /// Set the extra flags for command tools.
    #[must_use]
    pub fn with_extra_flags(mut self, flags: impl Into<String>) -> Self {
        self.extra_flags = flags.into();
        self
    }

    /// Set an explicit input file for command tools.
    #[must_use]
    pub fn with_infile(mut self, infile: impl Into<PathBuf>) -> Self {
        self.infile = Some(infile.into());
        self
    }

    /// Restrict the run to the given tools.
    #[must_use]
    pub fn with_enabled_tools(mut self, tools: Vec<ToolId>) -> Self {
        self.enabled_tools = Some(tools);
        self
    }

    /// Override one substitution variable for one tool.
    #[must_use]
    pub fn with_tool_override(
        mut self,
        tool: ToolId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.tool_overrides
            .entry(tool)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Set the worker pool size.
    #[must_use]
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set the per-job timeout.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Directory for flat-file summaries of this run.
    #[must_use]
    pub fn aggregated_dir(&self) -> PathBuf {
        self.output_root.join(AGGREGATED_DIR)
    }

    /// Input file for command tools.
    #[must_use]
    pub fn infile(&self) -> PathBuf {
        self.infile
            .clone()
            .unwrap_or_else(|| self.aggregated_dir().join(AGGREGATED_HOSTNAMES))
    }

    /// Output directory of a tool, given its subdirectory name.
    #[must_use]
    pub fn tool_output_dir(&self, subdir: &Path) -> PathBuf {
        self.output_root.join(subdir)
    }

    /// Check limits and values that would produce malformed jobs.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.domain.is_empty() {
            return Err(invalid("domain", "must not be empty"));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(invalid("output_root", "must not be empty"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if self.job_timeout.is_zero() {
            return Err(invalid("job_timeout", "must be greater than zero"));
        }
        if self.network_mode.trim().is_empty() {
            return Err(invalid("network_mode", "must not be empty"));
        }

        for (field, value) in [("proxy", &self.proxy), ("dns", &self.dns)] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(invalid(field, "must not be blank when set"));
                }
                if value.contains(['\n', '\r']) {
                    return Err(invalid(field, "must be a single line"));
                }
            }
        }

        if self.extra_flags.contains(['\n', '\r']) {
            return Err(invalid("extra_flags", "must be a single line"));
        }

        Ok(())
    }
}
