//! Render a [`ToolSpec`] against a [`RunConfig`] into a [`JobDescriptor`].
//!
//! Rendering is pure: it reads nothing and writes nothing. Files a job needs
//! on disk (the Dockerfile, a playbook) are returned as [`StagedFile`]s for
//! the backend to write.
//!
//! # Variables
//!
//! | name | value |
//! |---|---|
//! | `target`, `domain` | the run's domain |
//! | `tool` | tool id |
//! | `output_dir` | the tool's output directory on the host |
//! | `output_file` | output file name |
//! | `output_path` | `output_dir/output_file` |
//! | `output_mount` | container mount point (`output_dir` for commands) |
//! | `infile` | input file for command tools |
//! | `extra_flags` | the run's extra flags |
//! | `network_mode` | effective container network mode |
//! | `image` | rendered image tag (container tools) |
//! | `template` | staged template path |
//! | `proxy`, `dns` | only when set for the run |
//!
//! Tool substitutions are layered over these, and the run's per-tool
//! overrides over those.

use crate::error::TemplateError;
use crate::job::{CommandJob, ContainerJob, JobDescriptor, JobWork, StagedFile};
use crate::template::{references_any, substitute, substitute_lines, Vars};
use crate::tool::{ToolKind, ToolSpec};
use robot_core::RunConfig;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Variables whose absence makes the directives that use them inert.
pub const OPTIONAL_VARS: [&str; 2] = ["proxy", "dns"];

/// Subdirectory of a job's output directory holding staged templates.
pub const BUILD_DIR: &str = ".build";

/// Accumulates missing variable names across the parts of one tool.
#[derive(Default)]
struct Missing(BTreeSet<String>);

impl Missing {
    fn take(&mut self, result: Result<String, BTreeSet<String>>) -> String {
        result.unwrap_or_else(|names| {
            self.0.extend(names);
            String::new()
        })
    }
}

/// Render one tool.
///
/// # Errors
/// Returns `TemplateError` if a variable has no value, or the command line
/// cannot be tokenized.
pub fn render(spec: &ToolSpec, run: &RunConfig) -> Result<JobDescriptor, TemplateError> {
    let output_dir = run.tool_output_dir(&spec.output_subdir);
    let output_path = output_dir.join(&spec.output_file);
    let build_dir = output_dir.join(BUILD_DIR);

    let staged_path = spec.template.as_ref().map(|template| match spec.run {
        ToolKind::Container(_) => build_dir.join("Dockerfile"),
        ToolKind::Command(_) => build_dir.join(
            template
                .path
                .file_name()
                .unwrap_or_else(|| "template".as_ref()),
        ),
    });

    let mut vars = Vars::new();
    vars.insert("target".into(), run.domain.clone());
    vars.insert("domain".into(), run.domain.clone());
    vars.insert("tool".into(), spec.id.to_string());
    vars.insert("output_dir".into(), display(&output_dir));
    vars.insert("output_file".into(), spec.output_file.clone());
    vars.insert("output_path".into(), display(&output_path));
    vars.insert("infile".into(), display(&run.infile()));
    vars.insert("extra_flags".into(), run.extra_flags.clone());
    vars.insert("network_mode".into(), run.network_mode.clone());
    let output_mount = match &spec.run {
        ToolKind::Container(c) => c.output_mount.clone(),
        ToolKind::Command(_) => display(&output_dir),
    };
    vars.insert("output_mount".into(), output_mount);
    if let Some(path) = &staged_path {
        vars.insert("template".into(), display(path));
    }
    if let Some(proxy) = &run.proxy {
        vars.insert("proxy".into(), proxy.clone());
    }
    if let Some(dns) = &run.dns {
        vars.insert("dns".into(), dns.clone());
    }

    vars.extend(spec.substitutions.clone());
    if let Some(overrides) = run.tool_overrides.get(&spec.id) {
        vars.extend(overrides.clone());
    }

    let absent: BTreeSet<&str> = OPTIONAL_VARS
        .into_iter()
        .filter(|name| !vars.contains_key(*name))
        .collect();

    let mut missing = Missing::default();

    let work = match &spec.run {
        ToolKind::Container(c) => {
            let image_tag = missing.take(substitute(&c.image, &vars));
            vars.insert("image".into(), image_tag.clone());

            if let Some(mode) = &c.network_mode {
                let mode = missing.take(substitute(mode, &vars));
                vars.insert("network_mode".into(), mode);
            }

            let dockerfile = missing.take(substitute_lines(
                spec.template
                    .as_ref()
                    .map_or("", |t| t.contents.as_str()),
                &vars,
                &absent,
            ));

            let command = c
                .command
                .as_ref()
                .map(|cmd| missing.take(substitute(cmd, &vars)));

            let build_args = c
                .build_args
                .iter()
                .filter(|(_, value)| !references_any(value, &absent))
                .map(|(key, value)| (key.clone(), missing.take(substitute(value, &vars))))
                .collect();

            check_missing(spec, missing)?;

            let command = match command {
                Some(cmd) => split(spec, &cmd)?,
                None => Vec::new(),
            };

            JobWork::Container(ContainerJob {
                image_tag,
                dockerfile: StagedFile {
                    path: build_dir.join("Dockerfile"),
                    contents: dockerfile,
                },
                network_mode: vars
                    .get("network_mode")
                    .cloned()
                    .unwrap_or_else(|| run.network_mode.clone()),
                output_mount: c.output_mount.clone(),
                command,
                build_args,
            })
        }
        ToolKind::Command(c) => {
            let staged = match (&spec.template, &staged_path) {
                (Some(template), Some(path)) => Some(StagedFile {
                    path: path.clone(),
                    contents: missing.take(substitute_lines(&template.contents, &vars, &absent)),
                }),
                _ => None,
            };

            let line = missing.take(substitute(&c.line, &vars));
            let flags: Vec<String> = c
                .optional_flags
                .iter()
                .filter(|flag| !references_any(flag, &absent))
                .map(|flag| missing.take(substitute(flag, &vars)))
                .collect();

            check_missing(spec, missing)?;

            let mut tokens = split(spec, &line)?;
            for flag in &flags {
                tokens.extend(split(spec, flag)?);
            }

            if tokens.is_empty() {
                return Err(TemplateError::EmptyCommand {
                    tool: spec.id.clone(),
                });
            }

            let command_line = shell_words::join(&tokens);
            let program = tokens.remove(0);

            JobWork::Command(CommandJob {
                program,
                args: tokens,
                command_line,
                staged,
            })
        }
    };

    let descriptor = JobDescriptor {
        tool_id: spec.id.clone(),
        display_name: spec.name.clone(),
        format: spec.format,
        output_dir,
        output_path,
        work,
    };

    debug!(
        tool = %spec.id,
        kind = descriptor.kind(),
        output = %descriptor.output_path.display(),
        "rendered job"
    );

    Ok(descriptor)
}

/// Render every tool, separating failures from rendered jobs.
///
/// A failure affects only its own tool; order of `specs` is preserved in both
/// outputs.
#[must_use]
pub fn render_all(specs: &[ToolSpec], run: &RunConfig) -> (Vec<JobDescriptor>, Vec<TemplateError>) {
    let mut jobs = Vec::with_capacity(specs.len());
    let mut failures = Vec::new();

    for spec in specs {
        match render(spec, run) {
            Ok(job) => jobs.push(job),
            Err(e) => {
                warn!(tool = %spec.id, error = %e, "template rendering failed");
                failures.push(e);
            }
        }
    }

    (jobs, failures)
}

fn check_missing(spec: &ToolSpec, missing: Missing) -> Result<(), TemplateError> {
    if missing.0.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::Unresolved {
            tool: spec.id.clone(),
            names: missing.0.into_iter().collect(),
        })
    }
}

fn split(spec: &ToolSpec, line: &str) -> Result<Vec<String>, TemplateError> {
    shell_words::split(line).map_err(|e| TemplateError::Quoting {
        tool: spec.id.clone(),
        reason: e.to_string(),
    })
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_core::ToolId;
    use std::path::PathBuf;

    const DOCKERFILE: &str = "\
FROM python:3-alpine
ENV HTTP_PROXY $proxy
RUN echo nameserver $dns > /etc/resolv.conf
RUN pip install sublist3r
CMD sublist3r -d $target -t $threads -o $output_mount/$output_file
";

    fn id(s: &str) -> ToolId {
        ToolId::new(s).unwrap()
    }

    fn run() -> RunConfig {
        RunConfig::new("example.com", "/out/example.com").unwrap()
    }

    fn container() -> ToolSpec {
        ToolSpec::container(id("sublist3r"), "robot/sublist3r:$target", DOCKERFILE)
            .with_substitution("threads", "10")
    }

    fn unwrap_container(job: &JobDescriptor) -> &ContainerJob {
        match &job.work {
            JobWork::Container(c) => c,
            JobWork::Command(_) => panic!("expected container job"),
        }
    }

    fn unwrap_command(job: &JobDescriptor) -> &CommandJob {
        match &job.work {
            JobWork::Command(c) => c,
            JobWork::Container(_) => panic!("expected command job"),
        }
    }

    #[test]
    fn test_container_without_proxy_or_dns() {
        let job = render(&container(), &run()).unwrap();
        let c = unwrap_container(&job);

        assert_eq!(c.image_tag, "robot/sublist3r:example.com");
        assert_eq!(
            c.dockerfile.contents,
            "FROM python:3-alpine\nRUN pip install sublist3r\nCMD sublist3r -d example.com -t 10 -o /output/sublist3r.txt\n"
        );
        assert_eq!(
            c.dockerfile.path,
            PathBuf::from("/out/example.com/sublist3r/.build/Dockerfile")
        );
        assert_eq!(c.network_mode, "host");
        assert_eq!(job.output_dir, PathBuf::from("/out/example.com/sublist3r"));
        assert_eq!(
            job.output_path,
            PathBuf::from("/out/example.com/sublist3r/sublist3r.txt")
        );
        assert!(job.check().is_ok());
    }

    #[test]
    fn test_container_with_proxy_and_dns() {
        let run = run().with_proxy("http://10.0.0.1:3128").with_dns("10.0.0.53");
        let job = render(&container(), &run).unwrap();
        let c = unwrap_container(&job);

        assert!(c.dockerfile.contents.contains("ENV HTTP_PROXY http://10.0.0.1:3128"));
        assert!(c.dockerfile.contents.contains("nameserver 10.0.0.53"));
        assert!(!c.dockerfile.contents.contains('$'));
    }

    #[test]
    fn test_override_beats_substitution() {
        let run = run().with_tool_override(id("sublist3r"), "threads", "50");
        let job = render(&container(), &run).unwrap();
        assert!(unwrap_container(&job).dockerfile.contents.contains("-t 50"));
    }

    #[test]
    fn test_unresolved_reports_every_variable() {
        let spec = ToolSpec::container(
            id("amass"),
            "robot/amass:$tag",
            "FROM alpine\nRUN amass enum -d $target -w $wordlist\n",
        );
        let err = render(&spec, &run()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                tool: id("amass"),
                names: vec!["tag".to_string(), "wordlist".to_string()],
            }
        );
    }

    #[test]
    fn test_build_args_with_optional_values() {
        let mut spec = container();
        if let ToolKind::Container(c) = &mut spec.run {
            c.build_args.insert("HTTP_PROXY".into(), "$proxy".into());
            c.build_args.insert("TARGET".into(), "$target".into());
        }

        let job = render(&spec, &run()).unwrap();
        let args = &unwrap_container(&job).build_args;
        assert_eq!(args.len(), 1);
        assert_eq!(args["TARGET"], "example.com");

        let job = render(&spec, &run().with_proxy("http://p:1")).unwrap();
        assert_eq!(unwrap_container(&job).build_args["HTTP_PROXY"], "http://p:1");
    }

    #[test]
    fn test_command_tool() {
        let mut spec = ToolSpec::command(
            id("eyewitness"),
            "ansible-playbook -i $infile $extra_flags $template",
        )
        .with_template("playbooks/eyewitness.yml", "- hosts: all\n  vars:\n    target: $target\n");
        if let ToolKind::Command(c) = &mut spec.run {
            c.optional_flags.push("-e proxy=$proxy".into());
            c.optional_flags.push("-e 'label=robot run'".into());
        }

        let run = run().with_extra_flags("-v --check");
        let job = render(&spec, &run).unwrap();
        let c = unwrap_command(&job);

        assert_eq!(c.program, "ansible-playbook");
        assert_eq!(
            c.args,
            vec![
                "-i",
                "/out/example.com/aggregated/aggregated_hostnames.txt",
                "-v",
                "--check",
                "/out/example.com/eyewitness/.build/eyewitness.yml",
                "-e",
                "label=robot run",
            ]
        );
        let staged = c.staged.as_ref().unwrap();
        assert_eq!(staged.contents, "- hosts: all\n  vars:\n    target: example.com\n");
        assert!(job.check().is_ok());

        let job = render(&spec, &run.with_proxy("http://p:1")).unwrap();
        assert!(unwrap_command(&job).args.contains(&"proxy=http://p:1".to_string()));
    }

    #[test]
    fn test_command_quoting_error() {
        let spec = ToolSpec::command(id("knock"), "knockpy \"$target");
        assert!(matches!(
            render(&spec, &run()),
            Err(TemplateError::Quoting { .. })
        ));
    }

    #[test]
    fn test_command_empty() {
        let spec = ToolSpec::command(id("knock"), "$extra_flags");
        assert!(matches!(
            render(&spec, &run()),
            Err(TemplateError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_render_all_isolates_failures() {
        let good = ToolSpec::command(id("knock"), "knockpy $target");
        let bad = ToolSpec::command(id("amass"), "amass $missing");
        let also_good = ToolSpec::command(id("subfinder"), "subfinder -d $domain");

        let (jobs, failures) = render_all(&[good, bad, also_good], &run());
        let ids: Vec<_> = jobs.iter().map(|j| j.tool_id.as_str()).collect();
        assert_eq!(ids, vec!["knock", "subfinder"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].tool().as_str(), "amass");
    }
}
