//! Tool registry loading from TOML files.
//!
//! The registry path is either a single TOML file or a directory of them.
//! Directory entries are read in file-name order so the resulting tool order
//! is reproducible.

use crate::tool::{RegistryFile, TemplateSource, ToolSpec};
use robot_core::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loader for tool declarations.
pub struct ToolLoader {
    /// Registry file or directory
    path: PathBuf,
}

impl ToolLoader {
    /// Create a loader for a registry file or directory.
    ///
    /// # Errors
    /// Returns error if the path doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        Ok(Self { path })
    }

    /// Path this loader reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every tool in declaration order.
    ///
    /// Each template file is read relative to the registry file that
    /// declares it.
    ///
    /// # Errors
    /// Any unreadable or malformed file, or a missing template, fails the
    /// whole load.
    pub fn load_all(&self) -> ConfigResult<Vec<ToolSpec>> {
        let files = if self.path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&self.path)? {
                let path = entry?.path();
                if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    files.push(path);
                }
            }
            files.sort();
            files
        } else {
            vec![self.path.clone()]
        };

        let mut specs = Vec::new();
        for file in &files {
            specs.extend(Self::load_file(file)?);
        }

        info!(
            count = specs.len(),
            files = files.len(),
            path = %self.path.display(),
            "loaded tool registry"
        );

        Ok(specs)
    }

    /// Load the tools declared in one file.
    fn load_file(path: &Path) -> ConfigResult<Vec<ToolSpec>> {
        let contents = std::fs::read_to_string(path)?;
        let file: RegistryFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));

        file.tools
            .into_iter()
            .map(|def| -> ConfigResult<ToolSpec> {
                let template = match &def.template {
                    Some(rel) => Some(Self::read_template(base, rel, def.id.as_str())?),
                    None => None,
                };
                let spec = ToolSpec::from_definition(def, template);
                spec.validate()?;

                debug!(
                    tool = %spec.id,
                    kind = spec.run.name(),
                    file = %path.display(),
                    "loaded tool"
                );
                Ok(spec)
            })
            .collect()
    }

    fn read_template(base: &Path, rel: &Path, tool: &str) -> ConfigResult<TemplateSource> {
        let path = base.join(rel);
        if !path.is_file() {
            return Err(ConfigError::MissingTemplate {
                tool: tool.to_string(),
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&path)?;
        Ok(TemplateSource { path, contents })
    }
}
