#![expect(clippy::expect_used)]

//! Shared fixtures for the engine integration suite: a temp-root harness
//! with fast timings, scripted phase executors, and an in-memory
//! workspace double. Everything here drives the real worker loop and the
//! real queue store; only the two external seams are faked.

use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use concerto_core::Config;
use concerto_core::SubmitParams;
use concerto_core::Worker;
use concerto_core::WorkerTick;
use concerto_core::agents::AgentError;
use concerto_core::agents::ImplementRequest;
use concerto_core::agents::PhaseAgents;
use concerto_core::agents::PlanRequest;
use concerto_core::agents::ReviewRequest;
use concerto_core::agents::TestRequest;
use concerto_core::error::EngineError;
use concerto_core::handoff_io::read_handoff;
use concerto_core::submit;
use concerto_core::workspace::PreparedWorkspace;
use concerto_core::workspace::WorkspaceOps;
use concerto_core::workspace::WorkspaceRequest;
use concerto_protocol::FileAction;
use concerto_protocol::FileActionKind;
use concerto_protocol::ImplementorStepResult;
use concerto_protocol::PlanArtifact;
use concerto_protocol::PlanStep;
use concerto_protocol::PlanTask;
use concerto_protocol::ReviewArtifact;
use concerto_protocol::ReviewDecision;
use concerto_protocol::RunHandoff;
use concerto_protocol::TestArtifact;
use concerto_state::QueueStore;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const TEST_REPO_URL: &str = "https://example/x.git";

/// Temp-root harness: real queue store, real worker, fast timings.
pub struct TestHarness {
    _dir: TempDir,
    pub config: Config,
    pub store: QueueStore,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build a harness after letting the caller adjust the config
    /// (lease timeout, retry budgets, ...).
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("create temp root");
        let mut config = Config::new(dir.path().to_path_buf());
        config.poll_interval = Duration::from_millis(10);
        config.requeue_sleep = Duration::from_millis(10);
        config.heartbeat_interval = Duration::from_millis(50);
        config.lease_timeout = Duration::from_secs(30);
        adjust(&mut config);
        let store = QueueStore::open(config.queue_db().as_path(), config.tunables())
            .await
            .expect("open queue store");
        Self {
            _dir: dir,
            config,
            store,
        }
    }

    pub fn worker(
        &self,
        agents: Arc<dyn PhaseAgents>,
        workspace: Arc<dyn WorkspaceOps>,
    ) -> Worker {
        Worker::new(self.store.clone(), self.config.clone(), agents, workspace)
    }

    pub async fn submit_task(&self, task: &str) -> String {
        submit(
            &self.config,
            &self.store,
            SubmitParams {
                task: task.to_string(),
                repo_url: TEST_REPO_URL.to_string(),
                keep_workspace: false,
                base_branch: None,
            },
        )
        .await
        .expect("submit run")
        .run_id
    }

    pub async fn read_handoff(&self, run_id: &str) -> RunHandoff {
        read_handoff(&self.config.run_dir(run_id))
            .await
            .expect("read handoff")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.config.run_dir(run_id)
    }

    pub async fn artifact_json(&self, run_id: &str, name: &str) -> serde_json::Value {
        let contents = tokio::fs::read_to_string(self.run_dir(run_id).join(name))
            .await
            .unwrap_or_else(|err| panic!("read artifact {name}: {err}"));
        serde_json::from_str(&contents).expect("artifact is JSON")
    }

    pub async fn artifact_exists(&self, run_id: &str, name: &str) -> bool {
        tokio::fs::try_exists(self.run_dir(run_id).join(name))
            .await
            .unwrap_or(false)
    }
}

/// Drive a worker until it reports idle twice in a row (queue drained)
/// or `max_iterations` is hit. Returns every non-idle tick.
pub async fn drain_queue(worker: &Worker, max_iterations: usize) -> Vec<WorkerTick> {
    let mut ticks = Vec::new();
    let mut idle_streak = 0;
    for _ in 0..max_iterations {
        match worker.run_once().await.expect("worker iteration") {
            WorkerTick::Idle => {
                idle_streak += 1;
                if idle_streak >= 2 {
                    return ticks;
                }
            }
            tick => {
                idle_streak = 0;
                ticks.push(tick);
            }
        }
    }
    ticks
}

/// Scripted phase executors.
///
/// The planner emits one fixed step over `src/app.txt`, the implementor
/// writes that file, the reviewer pops scripted decisions (approving
/// when the script runs dry), and the tester returns the configured
/// status. Optional gates let tests pause inside the plan executor.
pub struct ScriptedAgents {
    pub requires_tests: bool,
    reviews: Mutex<VecDeque<ReviewArtifact>>,
    test_status: Mutex<String>,
    plan_failures_remaining: AtomicUsize,
    implement_calls: AtomicUsize,
    plan_started: Option<Arc<Notify>>,
    plan_gate: Option<Arc<Notify>>,
}

impl Default for ScriptedAgents {
    fn default() -> Self {
        Self {
            requires_tests: true,
            reviews: Mutex::new(VecDeque::new()),
            test_status: Mutex::new(TestArtifact::STATUS_PASSED.to_string()),
            plan_failures_remaining: AtomicUsize::new(0),
            implement_calls: AtomicUsize::new(0),
            plan_started: None,
            plan_gate: None,
        }
    }
}

impl ScriptedAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_tests() -> Self {
        Self {
            requires_tests: false,
            ..Self::default()
        }
    }

    /// Queue reviewer decisions; once exhausted the reviewer approves.
    pub fn script_reviews(self, decisions: Vec<ReviewArtifact>) -> Self {
        *self.reviews.lock().expect("reviews lock") = decisions.into();
        self
    }

    pub fn failing_tests(self) -> Self {
        *self.test_status.lock().expect("status lock") = "failed".to_string();
        self
    }

    pub fn failing_plans(self, failures: usize) -> Self {
        self.plan_failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    /// Pause the planner on `gate`, signalling `started` when entered.
    pub fn gated_plan(mut self, started: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.plan_started = Some(started);
        self.plan_gate = Some(gate);
        self
    }

    pub fn implement_calls(&self) -> usize {
        self.implement_calls.load(Ordering::SeqCst)
    }

    fn plan_artifact(&self) -> PlanArtifact {
        PlanArtifact {
            tasks: vec![PlanTask {
                id: "t1".to_string(),
                description: "apply the task".to_string(),
                requires_tests: self.requires_tests,
            }],
            allowed_files: vec!["src/app.txt".to_string()],
            steps: vec![PlanStep {
                id: "s1".to_string(),
                file: "src/app.txt".to_string(),
                description: "update the app file".to_string(),
            }],
            test_command: Some("true".to_string()),
            test_framework: Some("shell".to_string()),
            summary: None,
        }
    }
}

pub fn rejected_review(reasons: Vec<&str>) -> ReviewArtifact {
    ReviewArtifact {
        decision: ReviewDecision::Rejected,
        reasons: reasons.into_iter().map(str::to_string).collect(),
        notes: None,
    }
}

pub fn blocked_review(reason: &str) -> ReviewArtifact {
    ReviewArtifact {
        decision: ReviewDecision::Blocked,
        reasons: vec![reason.to_string()],
        notes: None,
    }
}

#[async_trait]
impl PhaseAgents for ScriptedAgents {
    async fn plan(&self, _request: PlanRequest<'_>) -> Result<PlanArtifact, AgentError> {
        if let Some(started) = &self.plan_started {
            started.notify_one();
        }
        if let Some(gate) = &self.plan_gate {
            gate.notified().await;
        }
        let remaining = self.plan_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.plan_failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::new("scripted planner failure"));
        }
        Ok(self.plan_artifact())
    }

    async fn implement_step(
        &self,
        request: ImplementRequest<'_>,
    ) -> Result<ImplementorStepResult, AgentError> {
        let call = self.implement_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ImplementorStepResult {
            actions: Some(vec![FileAction {
                path: request.step.file.clone(),
                action: FileActionKind::Write,
                content: Some(format!("implementor output {call}\n")),
            }]),
            diff: None,
            summary: Some(format!("wrote {} (call {call})", request.step.file)),
        })
    }

    async fn review(&self, _request: ReviewRequest<'_>) -> Result<ReviewArtifact, AgentError> {
        let scripted = self.reviews.lock().expect("reviews lock").pop_front();
        Ok(scripted.unwrap_or(ReviewArtifact {
            decision: ReviewDecision::Approved,
            reasons: Vec::new(),
            notes: None,
        }))
    }

    async fn test(&self, request: TestRequest<'_>) -> Result<TestArtifact, AgentError> {
        Ok(TestArtifact {
            status: self.test_status.lock().expect("status lock").clone(),
            skipped: false,
            command: request.test_command.map(str::to_string),
            output: None,
        })
    }
}

/// Workspace double: "cloning" creates a seeded directory, patches are
/// recorded rather than applied, and diffs are synthesized from the
/// touched paths.
#[derive(Default)]
pub struct MockWorkspace;

#[async_trait]
impl WorkspaceOps for MockWorkspace {
    async fn prepare(
        &self,
        request: WorkspaceRequest<'_>,
    ) -> Result<PreparedWorkspace, EngineError> {
        tokio::fs::create_dir_all(request.dest.join("src")).await?;
        tokio::fs::write(request.dest.join("src/app.txt"), "original\n").await?;
        Ok(PreparedWorkspace {
            root: request.dest.to_path_buf(),
            branch: request.branch.to_string(),
            base_branch: request.preferred_base.unwrap_or("main").to_string(),
        })
    }

    async fn apply_patch(&self, repo_root: &Path, diff: &str) -> Result<(), EngineError> {
        let log = repo_root.join(".applied-patches");
        let mut existing = tokio::fs::read_to_string(&log).await.unwrap_or_default();
        existing.push_str(diff);
        existing.push('\n');
        tokio::fs::write(&log, existing).await?;
        Ok(())
    }

    async fn diff(&self, _repo_root: &Path, paths: &[String]) -> Result<String, EngineError> {
        Ok(paths
            .iter()
            .map(|path| format!("diff --git a/{path} b/{path}\n"))
            .collect())
    }

    async fn remove(&self, repo_root: &Path) -> Result<(), EngineError> {
        match tokio::fs::remove_dir_all(repo_root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
