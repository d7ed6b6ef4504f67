//! Tool declarations.
//!
//! A registry file is a TOML document with a `[[tools]]` array. Each entry is
//! parsed into a [`ToolDefinition`] and then resolved by the loader into an
//! immutable [`ToolSpec`] whose template file has been read.
//!
//! ```toml
//! [[tools]]
//! id = "sublist3r"
//! name = "Sublist3r"
//! template = "templates/sublist3r.Dockerfile"
//! output_file = "sublist3r.txt"
//! format = "hosts"
//!
//! [tools.run]
//! kind = "container"
//! image = "robot/sublist3r:$target"
//! output_mount = "/root/output"
//! ```

use robot_core::{ConfigError, ConfigResult, OutputFormat, ToolId, AGGREGATED_DIR};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Top-level shape of one registry file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryFile {
    /// Tools in declaration order
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// One `[[tools]]` entry as written in the registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    /// Unique tool identifier
    pub id: ToolId,
    /// Human-readable name; defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    /// Template file, relative to the registry file
    #[serde(default)]
    pub template: Option<PathBuf>,
    /// File name the tool writes inside its output directory
    pub output_file: String,
    /// Output directory below the run's output root; defaults to the id
    #[serde(default)]
    pub output_subdir: Option<PathBuf>,
    /// Parser used for the output file
    #[serde(default)]
    pub format: OutputFormat,
    /// Whether the tool runs when no explicit selection is given
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Default substitution values
    #[serde(default, deserialize_with = "scalar_map")]
    pub substitutions: BTreeMap<String, String>,
    /// Execution kind
    pub run: ToolKind,
}

fn default_enabled() -> bool {
    true
}

/// How a tool is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolKind {
    /// Image built from a rendered Dockerfile and run with the output
    /// directory mounted
    #[serde(alias = "docker")]
    Container(ContainerSpec),
    /// External program run on the host, e.g. a playbook runner
    #[serde(alias = "ansible")]
    Command(CommandSpec),
}

impl ToolKind {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Container(_) => "container",
            Self::Command(_) => "command",
        }
    }
}

/// Container-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image tag template
    pub image: String,
    /// Network mode override; the run's mode is used when absent
    #[serde(default)]
    pub network_mode: Option<String>,
    /// Mount point of the output directory inside the container
    #[serde(default = "default_output_mount")]
    pub output_mount: String,
    /// Command template passed to `docker run` after the image
    #[serde(default)]
    pub command: Option<String>,
    /// `--build-arg` templates
    #[serde(default, deserialize_with = "scalar_map")]
    pub build_args: BTreeMap<String, String>,
}

fn default_output_mount() -> String {
    "/output".to_string()
}

/// Command-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command line template
    pub line: String,
    /// Flag templates appended to the command line. A flag that references
    /// an unset optional variable (`proxy`, `dns`) is left out.
    #[serde(default)]
    pub optional_flags: Vec<String>,
}

/// A template file and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Where the template was read from
    pub path: PathBuf,
    /// Raw template text
    pub contents: String,
}

/// A fully loaded, immutable tool declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Unique tool identifier
    pub id: ToolId,
    /// Human-readable name
    pub name: String,
    /// Template; required for container tools
    pub template: Option<TemplateSource>,
    /// File name the tool writes inside its output directory
    pub output_file: String,
    /// Output directory below the run's output root
    pub output_subdir: PathBuf,
    /// Parser used for the output file
    pub format: OutputFormat,
    /// Whether the tool runs when no explicit selection is given
    pub enabled: bool,
    /// Default substitution values
    pub substitutions: BTreeMap<String, String>,
    /// Execution kind
    pub run: ToolKind,
}

impl ToolSpec {
    /// Resolve a definition against an already read template.
    #[must_use]
    pub fn from_definition(def: ToolDefinition, template: Option<TemplateSource>) -> Self {
        let output_subdir = def
            .output_subdir
            .unwrap_or_else(|| PathBuf::from(def.id.as_str()));
        Self {
            name: def.name.unwrap_or_else(|| def.id.to_string()),
            id: def.id,
            template,
            output_file: def.output_file,
            output_subdir,
            format: def.format,
            enabled: def.enabled,
            substitutions: def.substitutions,
            run: def.run,
        }
    }

    /// A container tool with an in-memory Dockerfile template.
    #[must_use]
    pub fn container(id: ToolId, image: impl Into<String>, dockerfile: impl Into<String>) -> Self {
        Self::new(
            id,
            Some(TemplateSource {
                path: PathBuf::from("Dockerfile"),
                contents: dockerfile.into(),
            }),
            ToolKind::Container(ContainerSpec {
                image: image.into(),
                network_mode: None,
                output_mount: default_output_mount(),
                command: None,
                build_args: BTreeMap::new(),
            }),
        )
    }

    /// A command tool with no template file.
    #[must_use]
    pub fn command(id: ToolId, line: impl Into<String>) -> Self {
        Self::new(
            id,
            None,
            ToolKind::Command(CommandSpec {
                line: line.into(),
                optional_flags: Vec::new(),
            }),
        )
    }

    fn new(id: ToolId, template: Option<TemplateSource>, run: ToolKind) -> Self {
        Self {
            name: id.to_string(),
            output_file: format!("{id}.txt"),
            output_subdir: PathBuf::from(id.as_str()),
            id,
            template,
            format: OutputFormat::default(),
            enabled: true,
            substitutions: BTreeMap::new(),
            run,
        }
    }

    /// Set the output file name.
    #[must_use]
    pub fn with_output_file(mut self, name: impl Into<String>) -> Self {
        self.output_file = name.into();
        self
    }

    /// Set the output subdirectory.
    #[must_use]
    pub fn with_output_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.output_subdir = subdir.into();
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Add a default substitution value.
    #[must_use]
    pub fn with_substitution(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.substitutions.insert(key.into(), value.into());
        self
    }

    /// Set a template for the tool.
    #[must_use]
    pub fn with_template(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.template = Some(TemplateSource {
            path: path.into(),
            contents: contents.into(),
        });
        self
    }

    /// Mark the tool as disabled by default.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Output path relative to the run's output root.
    #[must_use]
    pub fn output_rel_path(&self) -> PathBuf {
        self.output_subdir.join(&self.output_file)
    }

    /// The output subdirectory with `.` components removed, for comparing
    /// job directories.
    #[must_use]
    pub fn output_dir_key(&self) -> PathBuf {
        self.output_subdir
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }

    /// Check the declaration for values that cannot produce a valid job.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
            field: format!("tools.{}.{field}", self.id),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty".to_string()));
        }

        if !is_plain_file_name(&self.output_file) {
            return Err(invalid(
                "output_file",
                format!("'{}' must be a bare file name", self.output_file),
            ));
        }

        if !is_contained_relative(&self.output_subdir) {
            return Err(invalid(
                "output_subdir",
                format!(
                    "'{}' must be a relative path below the output root, without '..'",
                    self.output_subdir.display()
                ),
            ));
        }

        if self.output_dir_key().starts_with(AGGREGATED_DIR) {
            return Err(invalid(
                "output_subdir",
                format!("'{AGGREGATED_DIR}' is reserved for aggregated artifacts"),
            ));
        }

        match &self.run {
            ToolKind::Container(container) => {
                if self.template.is_none() {
                    return Err(invalid(
                        "template",
                        "container tools need a Dockerfile template".to_string(),
                    ));
                }
                if container.image.trim().is_empty() {
                    return Err(invalid("run.image", "must not be empty".to_string()));
                }
                if !container.output_mount.starts_with('/') {
                    return Err(invalid(
                        "run.output_mount",
                        format!("'{}' must be an absolute path", container.output_mount),
                    ));
                }
            }
            ToolKind::Command(command) => {
                if command.line.trim().is_empty() {
                    return Err(invalid("run.line", "must not be empty".to_string()));
                }
            }
        }

        Ok(())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_contained_relative(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::Normal(_)))
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Deserialize a table of scalars into strings.
///
/// Numbers and booleans are kept in their literal TOML form.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, toml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "substitution '{key}' must be a string, number or boolean, got {}",
                        other.type_str()
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}
