//! Robot Tools - Tool registry and template rendering.
//!
//! This crate turns a declarative registry of recon tools into concrete,
//! runnable job descriptors. It loads `[[tools]]` TOML files, validates them
//! as a set, selects tools for a run in a deterministic order, and renders
//! each tool's templates against the run's configuration.
//!
//! # Architecture
//!
//! - **Tool declarations** ([`tool`]): `ToolSpec` and its execution kinds
//! - **Loader** ([`loader`]): TOML registry loading, templates read from disk
//! - **Registry** ([`registry`]): validated, ordered tool table and selection
//! - **Templates** ([`template`]): `$var` substitution
//! - **Renderer** ([`render`]): `ToolSpec` + `RunConfig` into [`JobDescriptor`]
//! - **Jobs** ([`job`]): rendered job descriptors
//! - **Errors** ([`error`]): registry and template error types
//!
//! # Example
//!
//! ```rust
//! use robot_core::{RunConfig, ToolId};
//! use robot_tools::{render_all, ToolRegistry, ToolSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ToolRegistry::from_specs(vec![
//!     ToolSpec::command(ToolId::new("subfinder")?, "subfinder -d $target -o $output_path"),
//! ])?;
//!
//! let run = RunConfig::new("example.com", "/tmp/robot/example.com")?;
//! let (jobs, failures) = render_all(&registry.select(None)?, &run);
//!
//! assert_eq!(jobs.len(), 1);
//! assert!(failures.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod job;
pub mod loader;
pub mod registry;
pub mod render;
pub mod template;
pub mod tool;

// Re-export commonly used types
pub use error::{Result, TemplateError, ToolError};
pub use job::{CommandJob, ContainerJob, JobDescriptor, JobWork, StagedFile};
pub use loader::ToolLoader;
pub use registry::ToolRegistry;
pub use render::{render, render_all, OPTIONAL_VARS};
pub use tool::{CommandSpec, ContainerSpec, TemplateSource, ToolDefinition, ToolKind, ToolSpec};
