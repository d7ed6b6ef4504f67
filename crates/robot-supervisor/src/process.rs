//! Subprocess backend.
//!
//! Command jobs run as host processes in their own process group. Container
//! jobs shell out to the docker CLI: `docker build` and a named
//! `docker create --rm` while starting, then `docker start -a`, whose client
//! process is supervised. Both write stdout and stderr to
//! `<output_dir>/<tool>.log`.
//!
//! A container that was created but never handed to the supervisor (the
//! start was cancelled or failed after `docker create`) is removed by
//! [`ContainerGuard`].

use crate::backend::{ExitReport, JobBackend, RunningJob};
use crate::error::{JobError, Result};
use async_trait::async_trait;
use robot_core::ToolId;
use robot_tools::{CommandJob, ContainerJob, JobDescriptor, JobWork};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Extra time allowed for `docker stop` and `docker rm` beyond the grace period.
const DOCKER_CLI_SLACK: Duration = Duration::from_secs(10);

/// Bytes read from the end of a log when describing a failure.
const LOG_TAIL_BYTES: u64 = 2048;

/// Lines kept from the end of a log when describing a failure.
const LOG_TAIL_LINES: usize = 5;

/// Build or create failures containing any of these are worth a retry.
const TRANSIENT_DOCKER_MARKERS: &[&str] = &[
    "net/http",
    "i/o timeout",
    "tls handshake timeout",
    "temporary failure in name resolution",
    "connection refused",
    "connection reset",
    "toomanyrequests",
    "client.timeout",
    "no such host",
];

/// Runs jobs as local processes and docker containers.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    docker_bin: String,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend {
    /// Backend using `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docker_bin: "docker".to_string(),
        }
    }

    /// Use a different container CLI (e.g. `podman` or an absolute path).
    #[must_use]
    pub fn with_docker_bin(mut self, bin: impl Into<String>) -> Self {
        self.docker_bin = bin.into();
        self
    }

    async fn start_command(
        &self,
        job: &JobDescriptor,
        work: &CommandJob,
        log_path: &Path,
    ) -> Result<Box<dyn RunningJob>> {
        let (stdout, stderr) = log_stdio(log_path, false).await?;

        let mut cmd = Command::new(&work.program);
        cmd.args(&work.args)
            .current_dir(&job.output_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        info!(tool = %job.tool_id, command = %work.command_line, "spawning command");
        let child = cmd
            .spawn()
            .map_err(|e| spawn_error(&job.tool_id, &work.program, &e))?;

        Ok(Box::new(ChildJob {
            tool: job.tool_id.clone(),
            group: child.id(),
            child,
            log_path: log_path.to_path_buf(),
            container: None,
        }))
    }

    async fn start_container(
        &self,
        job: &JobDescriptor,
        work: &ContainerJob,
        log_path: &Path,
    ) -> Result<Box<dyn RunningJob>> {
        tokio::fs::write(log_path, b"").await?;

        let output_dir = tokio::fs::canonicalize(&job.output_dir).await?;
        let dockerfile = tokio::fs::canonicalize(&work.dockerfile.path).await?;
        let context = dockerfile
            .parent()
            .map_or_else(|| output_dir.clone(), Path::to_path_buf);

        self.build_image(job, work, &dockerfile, &context, log_path)
            .await?;

        let name = container_name(&job.tool_id);
        let guard = ContainerGuard::new(&self.docker_bin, &name);
        self.create_container(job, work, &output_dir, &name, log_path)
            .await?;

        let (stdout, stderr) = log_stdio(log_path, true).await?;
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["start", "-a", &name])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        info!(
            tool = %job.tool_id,
            image = %work.image_tag,
            container = %name,
            network = %work.network_mode,
            "running container"
        );
        let child = cmd
            .spawn()
            .map_err(|e| spawn_error(&job.tool_id, &self.docker_bin, &e))?;

        Ok(Box::new(ChildJob {
            tool: job.tool_id.clone(),
            group: None,
            child,
            log_path: log_path.to_path_buf(),
            container: Some(guard.into_handle()),
        }))
    }

    async fn create_container(
        &self,
        job: &JobDescriptor,
        work: &ContainerJob,
        output_dir: &Path,
        name: &str,
        log_path: &Path,
    ) -> Result<()> {
        let output = Command::new(&self.docker_bin)
            .args(create_args(work, output_dir, name))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&job.tool_id, &self.docker_bin, &e))?;

        if output.status.success() {
            debug!(tool = %job.tool_id, container = %name, "container created");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        append_log(log_path, &output.stderr).await;
        Err(JobError::Start {
            tool: job.tool_id.clone(),
            reason: format!(
                "container create failed ({}): {}",
                ExitReport::failure(output.status.code(), None).describe(),
                tail_lines(&stderr).unwrap_or_default()
            ),
            transient: is_transient_docker_failure(&stderr),
        })
    }

    async fn build_image(
        &self,
        job: &JobDescriptor,
        work: &ContainerJob,
        dockerfile: &Path,
        context: &Path,
        log_path: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["build", "--network", &work.network_mode, "-t", &work.image_tag]);
        for (key, value) in &work.build_args {
            cmd.arg("--build-arg").arg(format!("{key}={value}"));
        }
        cmd.arg("-f")
            .arg(dockerfile)
            .arg(context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(tool = %job.tool_id, image = %work.image_tag, "building image");
        let output = cmd
            .output()
            .await
            .map_err(|e| spawn_error(&job.tool_id, &self.docker_bin, &e))?;

        let mut log = output.stdout.clone();
        log.extend_from_slice(&output.stderr);
        tokio::fs::write(log_path, &log).await?;

        if output.status.success() {
            debug!(tool = %job.tool_id, image = %work.image_tag, "image built");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let transient = is_transient_docker_failure(&stderr);
        let mut reason = format!(
            "image build failed ({}): {}",
            ExitReport::failure(output.status.code(), None).describe(),
            tail_lines(&stderr).unwrap_or_default()
        );
        if needs_proxy_hint(&stderr) {
            reason.push_str(" (check that the proxy is reachable from the docker daemon)");
        }

        Err(JobError::Start {
            tool: job.tool_id.clone(),
            reason,
            transient,
        })
    }
}

#[async_trait]
impl JobBackend for ProcessBackend {
    async fn start(&self, job: &JobDescriptor) -> Result<Box<dyn RunningJob>> {
        job.check().map_err(|reason| JobError::InvalidDescriptor {
            tool: job.tool_id.clone(),
            reason,
        })?;

        tokio::fs::create_dir_all(&job.output_dir).await?;
        for staged in job.staged_files() {
            if let Some(parent) = staged.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&staged.path, &staged.contents).await?;
        }

        match tokio::fs::remove_file(&job.output_path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let log_path = job.output_dir.join(format!("{}.log", job.tool_id));
        match &job.work {
            JobWork::Command(work) => self.start_command(job, work, &log_path).await,
            JobWork::Container(work) => self.start_container(job, work, &log_path).await,
        }
    }
}

#[derive(Clone)]
struct ContainerHandle {
    docker_bin: String,
    name: String,
}

/// Removes a created container unless it is handed over to a [`ChildJob`].
struct ContainerGuard {
    handle: ContainerHandle,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker_bin: &str, name: &str) -> Self {
        Self {
            handle: ContainerHandle {
                docker_bin: docker_bin.to_string(),
                name: name.to_string(),
            },
            armed: true,
        }
    }

    fn into_handle(mut self) -> ContainerHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let ContainerHandle { docker_bin, name } = self.handle.clone();
        debug!(container = %name, "removing container that never started");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    docker_cli(&docker_bin, &["rm", "-f", &name], DOCKER_CLI_SLACK).await;
                });
            }
            Err(_) => warn!(container = %name, "no runtime to remove container"),
        }
    }
}

/// A spawned process: either the job itself or the `docker run` client.
struct ChildJob {
    tool: ToolId,
    child: Child,
    /// Process group of a command job
    group: Option<u32>,
    log_path: PathBuf,
    container: Option<ContainerHandle>,
}

impl ChildJob {
    async fn stop_process(&mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            self.request_stop();
            if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
                warn!(tool = %self.tool, ?grace, "job ignored stop request, killing");
                self.kill_group();
                if let Err(e) = self.child.kill().await {
                    debug!(tool = %self.tool, error = %e, "kill after grace period");
                }
                self.child.wait().await?;
            }
        }
        self.kill_group();
        Ok(())
    }

    async fn stop_container(&mut self, grace: Duration) -> Result<()> {
        if let Some(container) = &self.container {
            let secs = grace.as_secs().max(1).to_string();
            docker_cli(
                &container.docker_bin,
                &["stop", "-t", &secs, &container.name],
                grace + DOCKER_CLI_SLACK,
            )
            .await;
        }

        if self.child.try_wait()?.is_none() {
            if let Err(e) = self.child.kill().await {
                debug!(tool = %self.tool, error = %e, "kill docker client");
            }
        }
        self.child.wait().await?;

        // The client is gone, so nothing can start the container again.
        if let Some(container) = &self.container {
            docker_cli(
                &container.docker_bin,
                &["rm", "-f", &container.name],
                DOCKER_CLI_SLACK,
            )
            .await;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        match self.group {
            Some(pgid) => signal_group(pgid, libc::SIGTERM),
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Kill whatever is left of the job's process group.
    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.group {
            signal_group(pgid, libc::SIGKILL);
        }
    }
}

#[async_trait]
impl RunningJob for ChildJob {
    async fn wait(&mut self) -> Result<ExitReport> {
        let status = self.child.wait().await?;
        self.kill_group();

        if status.success() {
            return Ok(ExitReport::success());
        }
        Ok(ExitReport::failure(
            status.code(),
            log_tail(&self.log_path).await,
        ))
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.container.is_some() {
            self.stop_container(grace).await
        } else {
            self.stop_process(grace).await
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, signal, error = %err, "failed to signal process group");
        }
    }
}

async fn docker_cli(bin: &str, args: &[&str], limit: Duration) {
    let status = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(limit, status).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => debug!(?args, %status, "docker command failed"),
        Ok(Err(e)) => warn!(?args, error = %e, "could not run docker"),
        Err(_) => warn!(?args, ?limit, "docker command timed out"),
    }
}

async fn log_stdio(path: &Path, append: bool) -> io::Result<(Stdio, Stdio)> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?
        .into_std()
        .await;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

fn spawn_error(tool: &ToolId, program: &str, err: &io::Error) -> JobError {
    let reason = match err.kind() {
        io::ErrorKind::NotFound => format!("{program}: command not found"),
        io::ErrorKind::PermissionDenied => format!("{program}: permission denied"),
        _ => format!("{program}: {err}"),
    };
    JobError::Start {
        tool: tool.clone(),
        reason,
        transient: false,
    }
}

fn create_args(work: &ContainerJob, output_dir: &Path, name: &str) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        work.network_mode.clone(),
        "-v".to_string(),
        format!("{}:{}", output_dir.display(), work.output_mount),
        work.image_tag.clone(),
    ];
    args.extend(work.command.iter().cloned());
    args
}

async fn append_log(path: &Path, bytes: &[u8]) {
    use tokio::io::AsyncWriteExt;

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;
    let result = match file {
        Ok(mut file) => file.write_all(bytes).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(path = %path.display(), error = %e, "cannot append to job log");
    }
}

fn container_name(tool: &ToolId) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("robot-{tool}-{}", &suffix[..8])
}

fn is_transient_docker_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    TRANSIENT_DOCKER_MARKERS.iter().any(|m| lower.contains(m))
}

fn needs_proxy_hint(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("net/http") || lower.contains("proxyconnect")
}

fn tail_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

async fn log_tail(path: &Path) -> Option<String> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    file.seek(io::SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))
        .await
        .ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.ok()?;
    tail_lines(&String::from_utf8_lossy(&buf))
}
