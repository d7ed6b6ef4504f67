//! In-memory tool registry with deterministic selection.

use crate::{loader::ToolLoader, tool::ToolSpec};
use robot_core::{ConfigError, ConfigResult, ToolId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable, ordered table of tools.
///
/// Built once per run. Order is configuration order, and every selection
/// preserves it so logs and dumps are reproducible.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Vec<ToolSpec>>,
}

impl ToolRegistry {
    /// Load and validate every tool from `loader`.
    ///
    /// # Errors
    /// Returns `ConfigError` if loading fails or the tool set is inconsistent.
    pub fn load(loader: &ToolLoader) -> ConfigResult<Self> {
        Self::from_specs(loader.load_all()?)
    }

    /// Build a registry from already loaded tools.
    ///
    /// # Errors
    /// - `ConfigError::DuplicateTool` if two tools share an id
    /// - `ConfigError::OutputCollision` if two enabled tools share or nest
    ///   their output directories
    /// - `ConfigError::InvalidValue` if a declaration is invalid
    pub fn from_specs(specs: Vec<ToolSpec>) -> ConfigResult<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(&spec.id) {
                return Err(ConfigError::DuplicateTool(spec.id.to_string()));
            }
        }

        check_output_collisions(specs.iter().filter(|s| s.enabled))?;

        info!(
            count = specs.len(),
            enabled = specs.iter().filter(|s| s.enabled).count(),
            "built tool registry"
        );

        Ok(Self {
            tools: Arc::new(specs),
        })
    }

    /// Select tools for a run.
    ///
    /// With `None`, every enabled tool is selected. With an explicit list,
    /// exactly the listed tools are selected, enabled or not. Either way the
    /// result is in registry order.
    ///
    /// # Errors
    /// - `ConfigError::UnknownTool` if a requested id is not registered
    /// - `ConfigError::OutputCollision` if two selected tools share or nest
    ///   their output directories
    pub fn select(&self, requested: Option<&[ToolId]>) -> ConfigResult<Vec<ToolSpec>> {
        let selected: Vec<ToolSpec> = match requested {
            None => self.tools.iter().filter(|s| s.enabled).cloned().collect(),
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| self.get(id).is_none()) {
                    return Err(ConfigError::UnknownTool(unknown.to_string()));
                }
                let wanted: HashSet<&ToolId> = ids.iter().collect();
                self.tools
                    .iter()
                    .filter(|s| wanted.contains(&s.id))
                    .cloned()
                    .collect()
            }
        };

        check_output_collisions(selected.iter())?;

        debug!(
            tools = ?selected.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "selected tools"
        );

        Ok(selected)
    }

    /// Get a tool by id.
    #[must_use]
    pub fn get(&self, id: &ToolId) -> Option<&ToolSpec> {
        self.tools.iter().find(|s| &s.id == id)
    }

    /// All tools in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    /// All tool ids in registry order.
    #[must_use]
    pub fn ids(&self) -> Vec<ToolId> {
        self.tools.iter().map(|s| s.id.clone()).collect()
    }

    /// Position of a tool in registry order.
    #[must_use]
    pub fn position(&self, id: &ToolId) -> Option<usize> {
        self.tools.iter().position(|s| &s.id == id)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Every tool must own its job directory: no two tools may share an output
/// subdirectory or nest one inside the other.
fn check_output_collisions<'a>(specs: impl Iterator<Item = &'a ToolSpec>) -> ConfigResult<()> {
    let mut owners: Vec<(PathBuf, &ToolId)> = Vec::new();

    for spec in specs {
        let dir = spec.output_dir_key();
        if let Some((owned, first)) = owners
            .iter()
            .find(|(owned, _)| owned.starts_with(&dir) || dir.starts_with(owned))
        {
            let path = if owned == &dir {
                spec.output_rel_path()
            } else if owned.starts_with(&dir) {
                owned.clone()
            } else {
                dir.clone()
            };
            return Err(ConfigError::OutputCollision {
                first: first.to_string(),
                second: spec.id.to_string(),
                path: path.display().to_string(),
            });
        }
        owners.push((dir, &spec.id));
    }

    Ok(())
}
