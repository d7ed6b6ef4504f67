//! Error roots shared by every robot crate.
//!
//! [`ConfigError`] aborts a run before any job starts. [`RobotError`] is the
//! type crate-local errors convert into when they cross a crate boundary;
//! its variant tells the caller whether one tool, one domain or the whole
//! run is affected.

use thiserror::Error;

/// Failure classes of the engine, by the stage that raised them.
#[derive(Error, Debug)]
pub enum RobotError {
    /// Bad registry or run configuration; the run never starts
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// One tool's template did not render
    #[error("template: {0}")]
    Template(String),

    /// One job did not start or did not finish
    #[error("job: {0}")]
    Job(String),

    /// Record store could not be opened or written
    #[error("record store: {0}")]
    Store(String),

    /// A value such as a domain or tool id is malformed
    #[error("invalid input: {0}")]
    Validation(String),

    /// Filesystem failure outside any single job
    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with the application config or the tool registry.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to derive XDG paths from
    #[error("no XDG config or data directory available for this user")]
    NoConfigDir,

    /// A config or registry file that must exist does not
    #[error("{path} does not exist")]
    NotFound {
        /// Expected location
        path: String,
    },

    /// A config or registry file is not valid TOML for its schema
    #[error("{path}: {source}")]
    Parse {
        /// File being parsed
        path: String,
        /// Deserializer message
        #[source]
        source: toml::de::Error,
    },

    /// `AppConfig` could not be written back as TOML
    #[error("cannot encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A tool references a template file that does not exist
    #[error("template for tool {tool} not found at {path}")]
    MissingTemplate {
        /// Tool declaring the template
        tool: String,
        /// Resolved template path
        path: String,
    },

    /// Two tools declare the same identifier
    #[error("duplicate tool id: {0}")]
    DuplicateTool(String),

    /// Two selected tools share or nest their output directories
    #[error("tools {first} and {second} both write {path}")]
    OutputCollision {
        /// First tool, in registry order
        first: String,
        /// Second tool, in registry order
        second: String,
        /// Colliding path relative to the output root
        path: String,
    },

    /// A tool was requested that the registry does not know
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Reading a config, registry or template file failed
    #[error("reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A field holds a value the engine cannot run with
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `supervisor.max_concurrency`
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type alias using `RobotError`.
pub type Result<T> = std::result::Result<T, RobotError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
