//! Error types for the tool registry and template renderer.

use robot_core::{ConfigError, RobotError, ToolId};
use thiserror::Error;

/// Errors raised while loading, selecting or rendering tools.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Registry problem; aborts the run
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Rendering problem; fails a single tool
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A tool's template could not be turned into a runnable job.
///
/// Fatal for that tool only; the other tools of the run proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Variables referenced by the template have no value
    #[error("tool {tool}: unresolved template variables: {}", names.join(", "))]
    Unresolved {
        /// Tool being rendered
        tool: ToolId,
        /// Every missing variable name, sorted
        names: Vec<String>,
    },

    /// Rendered command line has unbalanced quotes or a dangling escape
    #[error("tool {tool}: cannot split command line: {reason}")]
    Quoting {
        /// Tool being rendered
        tool: ToolId,
        /// Tokenizer message
        reason: String,
    },

    /// Rendered command line is empty
    #[error("tool {tool}: rendered command line is empty")]
    EmptyCommand {
        /// Tool being rendered
        tool: ToolId,
    },
}

impl TemplateError {
    /// Tool whose template failed.
    #[must_use]
    pub fn tool(&self) -> &ToolId {
        match self {
            Self::Unresolved { tool, .. }
            | Self::Quoting { tool, .. }
            | Self::EmptyCommand { tool } => tool,
        }
    }
}

impl From<TemplateError> for RobotError {
    fn from(err: TemplateError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<ToolError> for RobotError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Config(e) => Self::Config(e),
            ToolError::Template(e) => e.into(),
        }
    }
}

/// Result type for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;
