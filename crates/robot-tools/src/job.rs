//! Rendered, runnable job descriptors.

use robot_core::{OutputFormat, ToolId};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A rendered template that must be written to disk before the job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Destination inside the job's output directory
    pub path: PathBuf,
    /// Rendered contents
    pub contents: String,
}

/// A fully rendered unit of work for one tool.
///
/// Contains no unresolved template variables. Consumed exactly once by the
/// supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Tool the job was rendered from
    pub tool_id: ToolId,
    /// Human-readable tool name
    pub display_name: String,
    /// Parser for the output file
    pub format: OutputFormat,
    /// Directory owned by this job
    pub output_dir: PathBuf,
    /// File the tool is expected to produce
    pub output_path: PathBuf,
    /// What to execute
    pub work: JobWork,
}

/// Execution payload of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobWork {
    /// Build an image and run it
    Container(ContainerJob),
    /// Run a host program
    Command(CommandJob),
}

/// Rendered container build and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerJob {
    /// Tag for the built image
    pub image_tag: String,
    /// Rendered Dockerfile; its parent directory is the build context
    pub dockerfile: StagedFile,
    /// Network mode for build and run
    pub network_mode: String,
    /// Mount point of `output_dir` inside the container
    pub output_mount: String,
    /// Arguments after the image name in `docker run`
    pub command: Vec<String>,
    /// Rendered `--build-arg` values
    pub build_args: BTreeMap<String, String>,
}

/// Rendered host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandJob {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// The full command line, shell-quoted, for logs
    pub command_line: String,
    /// Rendered template file referenced by the command, if any
    pub staged: Option<StagedFile>,
}

impl JobDescriptor {
    /// Short description of the job kind for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.work {
            JobWork::Container(_) => "container",
            JobWork::Command(_) => "command",
        }
    }

    /// Files that must be written before the job starts.
    #[must_use]
    pub fn staged_files(&self) -> Vec<&StagedFile> {
        match &self.work {
            JobWork::Container(c) => vec![&c.dockerfile],
            JobWork::Command(c) => c.staged.iter().collect(),
        }
    }

    /// Structural check run by backends before anything is started.
    ///
    /// # Errors
    /// Returns a description of the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if !self.output_path.starts_with(&self.output_dir) {
            return Err(format!(
                "output path {} is outside output directory {}",
                self.output_path.display(),
                self.output_dir.display()
            ));
        }

        for staged in self.staged_files() {
            if !staged.path.starts_with(&self.output_dir) {
                return Err(format!(
                    "staged file {} is outside output directory {}",
                    staged.path.display(),
                    self.output_dir.display()
                ));
            }
        }

        match &self.work {
            JobWork::Container(c) => {
                if c.image_tag.trim().is_empty() {
                    return Err("empty image tag".to_string());
                }
                if c.image_tag.chars().any(char::is_whitespace) {
                    return Err(format!("image tag '{}' contains whitespace", c.image_tag));
                }
            }
            JobWork::Command(c) => {
                if c.program.is_empty() {
                    return Err("empty program".to_string());
                }
            }
        }

        Ok(())
    }
}
