//! Robot Core - Foundation crate for the robot reconnaissance engine.
//!
//! This crate provides the types every other robot crate speaks: the error
//! roots, application configuration, the per-run [`RunConfig`], tool
//! identifiers, output formats and the canonical [`DiscoveryRecord`].
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`run`] - The validated per-run configuration handed to every stage
//! - [`types`] - Shared newtypes and enums (`ToolId`, `OutputFormat`)
//! - [`record`] - `DiscoveryRecord` and its identity key
//! - [`normalize`] - Hostname, IP and domain normalization
//!
//! # Example
//!
//! ```rust
//! use robot_core::{AppConfig, DiscoveryRecord};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let run = config.run_config("Example.COM")?;
//! assert_eq!(run.domain, "example.com");
//!
//! let record = DiscoveryRecord::new(&run.domain, Some("1.2.3.4"), Some("a.example.com"), None);
//! assert!(record.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod normalize;
pub mod record;
pub mod run;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, GeneralConfig, NetworkConfig, SupervisorConfig};
pub use error::{ConfigError, ConfigResult, Result, RobotError};
pub use normalize::{is_in_scope, normalize_domain, normalize_hostname, normalize_ip};
pub use record::{DiscoveryRecord, RecordIdentity};
pub use run::{RunConfig, AGGREGATED_DIR, AGGREGATED_HOSTNAMES};
pub use types::{OutputFormat, ToolId};
