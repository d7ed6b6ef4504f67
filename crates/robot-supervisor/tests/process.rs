//! Real subprocesses through `ProcessBackend`.
#![cfg(unix)]

use robot_core::{OutputFormat, ToolId};
use robot_supervisor::{CancellationToken, JobStatus, JobSupervisor, ProcessBackend};
use robot_tools::{CommandJob, ContainerJob, JobDescriptor, JobWork, StagedFile};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sh_job(dir: &Path, tool: &str, script: &str) -> JobDescriptor {
    let output_dir = dir.join(tool);
    JobDescriptor {
        tool_id: ToolId::new(tool).unwrap(),
        display_name: tool.to_string(),
        format: OutputFormat::Hosts,
        output_path: output_dir.join("out.txt"),
        output_dir,
        work: JobWork::Command(CommandJob {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            command_line: format!("sh -c '{script}'"),
            staged: None,
        }),
    }
}

fn container_job(dir: &Path, tool: &str) -> JobDescriptor {
    let output_dir = dir.join(tool);
    JobDescriptor {
        tool_id: ToolId::new(tool).unwrap(),
        display_name: tool.to_string(),
        format: OutputFormat::Hosts,
        output_path: output_dir.join("out.txt"),
        work: JobWork::Container(ContainerJob {
            image_tag: format!("robot/{tool}"),
            dockerfile: StagedFile {
                path: output_dir.join(".build/Dockerfile"),
                contents: "FROM alpine\n".to_string(),
            },
            network_mode: "host".to_string(),
            output_mount: "/out".to_string(),
            command: vec!["-d".to_string(), "example.com".to_string()],
            build_args: BTreeMap::new(),
        }),
        output_dir,
    }
}

/// A stand-in docker CLI that appends each invocation to `calls`.
fn fake_docker(dir: &Path, body: &str) -> PathBuf {
    let bin = dir.join("docker");
    let calls = dir.join("calls");
    std::fs::write(
        &bin,
        format!("#!/bin/sh\necho \"$*\" >> '{}'\n{body}\n", calls.display()),
    )
    .unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

async fn wait_for_call(dir: &Path, prefix: &str) -> Vec<String> {
    for _ in 0..100 {
        let calls = docker_calls(dir);
        if calls.iter().any(|c| c.starts_with(prefix)) {
            return calls;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("docker was never called with {prefix}: {:?}", docker_calls(dir));
}

fn docker_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn supervisor() -> JobSupervisor {
    JobSupervisor::new(Arc::new(ProcessBackend::new()))
        .with_grace_period(Duration::from_millis(300))
        .with_retry_backoff(Duration::from_millis(10))
}

/// Whether a pid refers to a live (non-zombie) process.
fn alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

async fn read_pids(dir: &Path) -> Vec<u32> {
    let path = dir.join("pids");
    for _ in 0..100 {
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            let pids: Vec<u32> = text.split_whitespace().filter_map(|p| p.parse().ok()).collect();
            if pids.len() == 2 {
                return pids;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job never wrote its pids");
}

async fn assert_all_dead(pids: &[u32]) {
    for _ in 0..100 {
        if pids.iter().all(|p| !alive(*p)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("processes survived their job: {pids:?}");
}

/// A shell that backgrounds a long sleep and records both pids.
const HANG: &str = "sleep 30 & echo $$ $! > pids; wait";

#[tokio::test]
async fn successful_command_reports_its_output() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(tmp.path(), "subfinder", "echo a.example.com > out.txt");

    let outcomes = supervisor()
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Succeeded);
    let output: PathBuf = outcomes[0].output_path.clone().unwrap();
    assert_eq!(
        std::fs::read_to_string(output).unwrap(),
        "a.example.com\n"
    );
    assert!(tmp.path().join("subfinder/subfinder.log").exists());
}

#[tokio::test]
async fn staged_files_are_written_before_start() {
    let tmp = TempDir::new().unwrap();
    let mut job = sh_job(tmp.path(), "eyewitness", "cp .build/play.yml out.txt");
    if let JobWork::Command(work) = &mut job.work {
        work.staged = Some(StagedFile {
            path: tmp.path().join("eyewitness/.build/play.yml"),
            contents: "- hosts: all\n".to_string(),
        });
    }

    let outcomes = supervisor()
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Succeeded);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("eyewitness/out.txt")).unwrap(),
        "- hosts: all\n"
    );
}

#[tokio::test]
async fn failing_command_reports_exit_code_and_log_tail() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(tmp.path(), "knock", "echo 'resolver unreachable' >&2; exit 3");

    let outcomes = supervisor()
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Failed);
    let detail = outcomes[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("exit code 3"), "{detail}");
    assert!(detail.contains("resolver unreachable"), "{detail}");
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(tmp.path(), "amass", HANG);
    let dir = job.output_dir.clone();

    let outcomes = supervisor()
        .with_job_timeout(Duration::from_millis(500))
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::TimedOut);
    assert_all_dead(&read_pids(&dir).await).await;
}

#[tokio::test]
async fn cancellation_kills_running_jobs() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(tmp.path(), "amass", HANG);
    let dir = job.output_dir.clone();

    let cancel = CancellationToken::new();
    let handle = supervisor().spawn_batch(vec![job], cancel.clone());

    let pids = read_pids(&dir).await;
    assert!(pids.iter().all(|p| alive(*p)));
    cancel.cancel();

    let outcomes = handle.finish().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, JobStatus::Cancelled);
    assert_all_dead(&pids).await;
}

#[tokio::test]
async fn jobs_ignoring_sigterm_are_killed_after_grace() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(
        tmp.path(),
        "shodan",
        &format!("trap '' TERM; {HANG}"),
    );
    let dir = job.output_dir.clone();

    let outcomes = supervisor()
        .with_job_timeout(Duration::from_millis(400))
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::TimedOut);
    assert_all_dead(&read_pids(&dir).await).await;
}

#[tokio::test]
async fn missing_program_fails_without_retry() {
    let tmp = TempDir::new().unwrap();
    let mut job = sh_job(tmp.path(), "ghost", "");
    if let JobWork::Command(work) = &mut job.work {
        work.program = "robot-definitely-not-installed".to_string();
    }

    let outcomes = supervisor()
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Failed);
    assert_eq!(outcomes[0].attempts, 1);
    assert!(outcomes[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("command not found"));
}

#[tokio::test]
async fn stale_output_from_a_previous_run_is_not_reported() {
    let tmp = TempDir::new().unwrap();

    let first = supervisor()
        .run_batch(
            vec![sh_job(tmp.path(), "subfinder", "echo old.example.com > out.txt")],
            CancellationToken::new(),
        )
        .await;
    assert!(first[0].output_path.is_some());

    let second = supervisor()
        .run_batch(vec![sh_job(tmp.path(), "subfinder", "true")], CancellationToken::new())
        .await;

    assert_eq!(second[0].status, JobStatus::Succeeded);
    assert!(second[0].output_path.is_none());
    assert!(!tmp.path().join("subfinder/out.txt").exists());
}

#[tokio::test]
async fn timed_out_job_leaves_no_partial_output() {
    let tmp = TempDir::new().unwrap();
    let job = sh_job(
        tmp.path(),
        "amass",
        &format!("echo partial.example.com > out.txt; {HANG}"),
    );
    let output = job.output_path.clone();

    let outcomes = supervisor()
        .with_job_timeout(Duration::from_millis(500))
        .run_batch(vec![job], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::TimedOut);
    assert!(outcomes[0].output_path.is_none());
    assert!(!output.exists());
}

#[tokio::test]
async fn cancelled_container_is_stopped_and_removed() {
    let tmp = TempDir::new().unwrap();
    let docker = fake_docker(tmp.path(), r#"[ "$1" = start ] && exec sleep 30; exit 0"#);
    let backend = ProcessBackend::new().with_docker_bin(docker.display().to_string());
    let supervisor = JobSupervisor::new(Arc::new(backend))
        .with_grace_period(Duration::from_millis(300));

    let cancel = CancellationToken::new();
    let handle = supervisor.spawn_batch(vec![container_job(tmp.path(), "sublist3r")], cancel.clone());
    wait_for_call(tmp.path(), "start -a ").await;
    cancel.cancel();

    let outcomes = handle.finish().await;
    assert_eq!(outcomes[0].status, JobStatus::Cancelled);

    let calls = docker_calls(tmp.path());
    let verbs: Vec<&str> = calls.iter().filter_map(|c| c.split(' ').next()).collect();
    assert_eq!(verbs, vec!["build", "create", "start", "stop", "rm"]);

    let name = calls[2].trim_start_matches("start -a ");
    assert!(name.starts_with("robot-sublist3r-"), "{name}");
    assert!(calls[1].starts_with(&format!("create --rm --name {name} --network host -v ")));
    assert!(calls[1].ends_with(" robot/sublist3r -d example.com"), "{}", calls[1]);
    assert_eq!(calls[3], format!("stop -t 1 {name}"));
    assert_eq!(calls[4], format!("rm -f {name}"));
}

#[tokio::test]
async fn container_left_behind_by_a_failed_start_is_removed() {
    let tmp = TempDir::new().unwrap();
    let docker = fake_docker(
        tmp.path(),
        r#"[ "$1" = create ] && { echo 'Error response from daemon: no space left' >&2; exit 1; }; exit 0"#,
    );
    let backend = ProcessBackend::new().with_docker_bin(docker.display().to_string());

    let outcomes = JobSupervisor::new(Arc::new(backend))
        .run_batch(vec![container_job(tmp.path(), "amass")], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Failed);
    assert_eq!(outcomes[0].attempts, 1);
    let detail = outcomes[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("container create failed"), "{detail}");

    let calls = wait_for_call(tmp.path(), "rm -f robot-amass-").await;
    assert!(calls.iter().all(|c| !c.starts_with("start")), "{calls:?}");
}
