//! Batch semantics against a scripted in-process backend.

use async_trait::async_trait;
use futures::StreamExt;
use robot_core::{OutputFormat, ToolId};
use robot_supervisor::{
    CancellationToken, ExitReport, JobBackend, JobError, JobOutcome, JobStatus, JobSupervisor,
    RunningJob,
};
use robot_tools::{CommandJob, JobDescriptor, JobWork};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Run for a while, then write the output file and exit 0
    Succeed(Duration),
    /// Exit 0 without writing the output file
    SucceedWithoutOutput,
    /// Exit with the given code
    Exit(i32),
    /// Fail to start transiently this many times, then succeed
    Flaky(u32),
    /// Fail to start permanently
    Broken,
    /// Never finish on its own
    Hang,
    /// Panic while starting
    Panic,
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    terminated: AtomicUsize,
    starts: Mutex<HashMap<String, u32>>,
}

struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    fn new(scripts: &[(&str, Script)]) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let backend = Self {
            scripts: scripts
                .iter()
                .map(|(tool, script)| ((*tool).to_string(), *script))
                .collect(),
            counters: counters.clone(),
        };
        (backend, counters)
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn start(&self, job: &JobDescriptor) -> robot_supervisor::Result<Box<dyn RunningJob>> {
        let tool = job.tool_id.to_string();
        let script = self.scripts[&tool];
        let attempt = {
            let mut starts = self.counters.starts.lock().unwrap();
            let count = starts.entry(tool).or_default();
            *count += 1;
            *count
        };

        match script {
            Script::Flaky(failures) if attempt <= failures => {
                return Err(JobError::Start {
                    tool: job.tool_id.clone(),
                    reason: "i/o timeout".to_string(),
                    transient: true,
                });
            }
            Script::Broken => {
                return Err(JobError::Start {
                    tool: job.tool_id.clone(),
                    reason: "no such image".to_string(),
                    transient: false,
                });
            }
            Script::Panic => panic!("scripted backend panic"),
            _ => {}
        }

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(ScriptedJob {
            script,
            output_path: job.output_path.clone(),
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedJob {
    script: Script,
    output_path: std::path::PathBuf,
    counters: Arc<Counters>,
}

#[async_trait]
impl RunningJob for ScriptedJob {
    async fn wait(&mut self) -> robot_supervisor::Result<ExitReport> {
        match self.script {
            Script::Succeed(after) => {
                tokio::time::sleep(after).await;
                tokio::fs::write(&self.output_path, "a.example.com\n").await?;
                Ok(ExitReport::success())
            }
            Script::Flaky(_) => {
                tokio::fs::write(&self.output_path, "b.example.com\n").await?;
                Ok(ExitReport::success())
            }
            Script::SucceedWithoutOutput => Ok(ExitReport::success()),
            Script::Exit(code) => Ok(ExitReport::failure(Some(code), Some("boom".to_string()))),
            Script::Hang | Script::Broken | Script::Panic => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> robot_supervisor::Result<()> {
        self.counters.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for ScriptedJob {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn job(dir: &Path, tool: &str) -> JobDescriptor {
    let output_dir = dir.join(tool);
    std::fs::create_dir_all(&output_dir).unwrap();
    JobDescriptor {
        tool_id: ToolId::new(tool).unwrap(),
        display_name: tool.to_string(),
        format: OutputFormat::Hosts,
        output_path: output_dir.join(format!("{tool}.txt")),
        output_dir,
        work: JobWork::Command(CommandJob {
            program: tool.to_string(),
            args: Vec::new(),
            command_line: tool.to_string(),
            staged: None,
        }),
    }
}

fn supervisor(backend: ScriptedBackend) -> JobSupervisor {
    JobSupervisor::new(Arc::new(backend))
        .with_retry_backoff(Duration::from_millis(10))
        .with_grace_period(Duration::from_millis(50))
}

fn by_tool(outcomes: Vec<JobOutcome>) -> HashMap<String, JobOutcome> {
    outcomes
        .into_iter()
        .map(|o| (o.tool_id.to_string(), o))
        .collect()
}

#[tokio::test]
async fn every_job_gets_exactly_one_outcome() {
    let tmp = TempDir::new().unwrap();
    let (backend, counters) = ScriptedBackend::new(&[
        ("amass", Script::Succeed(Duration::from_millis(20))),
        ("knock", Script::Exit(2)),
        ("sublist3r", Script::Broken),
        ("subfinder", Script::Flaky(1)),
        ("shodan", Script::SucceedWithoutOutput),
    ]);
    let jobs = ["amass", "knock", "sublist3r", "subfinder", "shodan"]
        .iter()
        .map(|t| job(tmp.path(), t))
        .collect();

    let outcomes = supervisor(backend)
        .run_batch(jobs, CancellationToken::new())
        .await;
    assert_eq!(outcomes.len(), 5);
    let outcomes = by_tool(outcomes);

    let amass = &outcomes["amass"];
    assert_eq!(amass.status, JobStatus::Succeeded);
    assert_eq!(
        amass.output_path.as_deref(),
        Some(tmp.path().join("amass/amass.txt").as_path())
    );

    let knock = &outcomes["knock"];
    assert_eq!(knock.status, JobStatus::Failed);
    assert!(knock.error_detail.as_deref().unwrap().contains("exit code 2"));

    let sublist3r = &outcomes["sublist3r"];
    assert_eq!(sublist3r.status, JobStatus::Failed);
    assert_eq!(sublist3r.attempts, 1);

    let subfinder = &outcomes["subfinder"];
    assert_eq!(subfinder.status, JobStatus::Succeeded);
    assert_eq!(subfinder.attempts, 2);

    let shodan = &outcomes["shodan"];
    assert_eq!(shodan.status, JobStatus::Succeeded);
    assert!(shodan.output_path.is_none());

    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_start_failures_retry_only_once() {
    let tmp = TempDir::new().unwrap();
    let (backend, counters) = ScriptedBackend::new(&[("amass", Script::Flaky(5))]);

    let outcomes = supervisor(backend)
        .run_batch(vec![job(tmp.path(), "amass")], CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].status, JobStatus::Failed);
    assert_eq!(outcomes[0].attempts, 2);
    assert_eq!(counters.starts.lock().unwrap()["amass"], 2);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let tmp = TempDir::new().unwrap();
    let tools: Vec<String> = (0..8).map(|i| format!("tool{i}")).collect();
    let scripts: Vec<(&str, Script)> = tools
        .iter()
        .map(|t| (t.as_str(), Script::Succeed(Duration::from_millis(40))))
        .collect();
    let (backend, counters) = ScriptedBackend::new(&scripts);
    let jobs = tools.iter().map(|t| job(tmp.path(), t)).collect();

    let outcomes = supervisor(backend)
        .with_max_concurrency(3)
        .run_batch(jobs, CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 8);
    assert!(outcomes.iter().all(JobOutcome::is_success));
    assert!(counters.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hung_job_times_out_and_is_terminated() {
    let tmp = TempDir::new().unwrap();
    let (backend, counters) = ScriptedBackend::new(&[
        ("amass", Script::Hang),
        ("knock", Script::Succeed(Duration::from_millis(10))),
    ]);

    let outcomes = supervisor(backend)
        .with_job_timeout(Duration::from_millis(100))
        .run_batch(
            vec![job(tmp.path(), "amass"), job(tmp.path(), "knock")],
            CancellationToken::new(),
        )
        .await;
    let outcomes = by_tool(outcomes);

    assert_eq!(outcomes["amass"].status, JobStatus::TimedOut);
    assert_eq!(outcomes["knock"].status, JobStatus::Succeeded);
    assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_stops_running_and_queued_jobs() {
    let tmp = TempDir::new().unwrap();
    let tools = ["a1", "a2", "a3", "a4", "a5"];
    let scripts: Vec<(&str, Script)> = tools.iter().map(|t| (*t, Script::Hang)).collect();
    let (backend, counters) = ScriptedBackend::new(&scripts);
    let jobs = tools.iter().map(|t| job(tmp.path(), t)).collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcomes = supervisor(backend)
        .with_max_concurrency(2)
        .run_batch(jobs, cancel)
        .await;

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.status == JobStatus::Cancelled));
    assert_eq!(counters.terminated.load(Ordering::SeqCst), 2);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_keeps_outcomes_of_finished_jobs() {
    let tmp = TempDir::new().unwrap();
    let (backend, counters) = ScriptedBackend::new(&[
        ("amass", Script::Succeed(Duration::from_millis(10))),
        ("knock", Script::Succeed(Duration::from_millis(10))),
        ("shodan", Script::Hang),
        ("sublist3r", Script::Hang),
    ]);
    let jobs = ["amass", "knock", "shodan", "sublist3r"]
        .iter()
        .map(|t| job(tmp.path(), t))
        .collect();

    let cancel = CancellationToken::new();
    let mut stream = Box::pin(
        supervisor(backend)
            .with_max_concurrency(4)
            .spawn_batch(jobs, cancel.clone())
            .into_stream(),
    );

    let mut outcomes = vec![
        stream.next().await.unwrap(),
        stream.next().await.unwrap(),
    ];
    cancel.cancel();
    outcomes.extend(stream.collect::<Vec<_>>().await);

    assert_eq!(outcomes.len(), 4);
    let outcomes = by_tool(outcomes);
    for tool in ["amass", "knock"] {
        assert_eq!(outcomes[tool].status, JobStatus::Succeeded);
        assert!(outcomes[tool].output_path.is_some());
    }
    for tool in ["shodan", "sublist3r"] {
        assert_eq!(outcomes[tool].status, JobStatus::Cancelled);
        assert!(outcomes[tool].output_path.is_none());
    }
    assert_eq!(counters.terminated.load(Ordering::SeqCst), 2);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let tmp = TempDir::new().unwrap();
    let (backend, counters) = ScriptedBackend::new(&[
        ("amass", Script::Succeed(Duration::ZERO)),
        ("knock", Script::Succeed(Duration::ZERO)),
    ]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = supervisor(backend)
        .run_batch(vec![job(tmp.path(), "amass"), job(tmp.path(), "knock")], cancel)
        .await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| o.status == JobStatus::Cancelled && o.attempts == 0));
    assert!(counters.starts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn panicking_backend_still_yields_outcomes() {
    let tmp = TempDir::new().unwrap();
    let (backend, _) = ScriptedBackend::new(&[
        ("amass", Script::Panic),
        ("knock", Script::Succeed(Duration::ZERO)),
        ("shodan", Script::Succeed(Duration::ZERO)),
    ]);
    let jobs = ["amass", "knock", "shodan"]
        .iter()
        .map(|t| job(tmp.path(), t))
        .collect();

    let outcomes = supervisor(backend)
        .with_max_concurrency(1)
        .run_batch(jobs, CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.status == JobStatus::Failed));
}

#[tokio::test]
async fn outcomes_stream_as_jobs_finish() {
    let tmp = TempDir::new().unwrap();
    let (backend, _) = ScriptedBackend::new(&[
        ("slow", Script::Succeed(Duration::from_millis(150))),
        ("fast", Script::Succeed(Duration::from_millis(10))),
    ]);

    let handle = supervisor(backend).spawn_batch(
        vec![job(tmp.path(), "slow"), job(tmp.path(), "fast")],
        CancellationToken::new(),
    );
    assert_eq!(handle.remaining(), 2);

    let order: Vec<String> = handle
        .into_stream()
        .map(|o| o.tool_id.to_string())
        .collect()
        .await;
    assert_eq!(order, vec!["fast", "slow"]);
}
