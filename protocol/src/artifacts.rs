use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::phase::Phase;
use crate::phase::ReviewDecision;

pub const ARTIFACT_PLAN: &str = "plan.json";
pub const ARTIFACT_IMPLEMENTOR: &str = "implementor.json";
pub const ARTIFACT_REVIEW: &str = "review.json";
pub const ARTIFACT_TEST: &str = "test.json";
pub const ARTIFACT_PR_DRAFT: &str = "pr-draft.json";

/// The artifact map a freshly submitted run starts with.
pub fn canonical_artifacts() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("plan".to_string(), ARTIFACT_PLAN.to_string()),
        ("implementor".to_string(), ARTIFACT_IMPLEMENTOR.to_string()),
        ("review".to_string(), ARTIFACT_REVIEW.to_string()),
        ("test".to_string(), ARTIFACT_TEST.to_string()),
        ("prDraft".to_string(), ARTIFACT_PR_DRAFT.to_string()),
    ])
}

/// Error sibling written next to a phase artifact when the executor fails.
pub fn error_artifact_name(phase: Phase) -> String {
    match phase {
        Phase::Plan => "plan.error.json".to_string(),
        Phase::Implement => "implementor.error.json".to_string(),
        Phase::Review => "review.error.json".to_string(),
        Phase::Test => "test.error.json".to_string(),
        Phase::Pr => "pr-draft.error.json".to_string(),
    }
}

/// Secondary handoff snapshot written before invoking the executor for the
/// implement, review, and test phases.
pub fn handoff_snapshot_name(phase: Phase) -> Option<String> {
    match phase {
        Phase::Implement => Some("handoff.implementor.json".to_string()),
        Phase::Review => Some("handoff.review.json".to_string()),
        Phase::Test => Some("handoff.test.json".to_string()),
        Phase::Plan | Phase::Pr => None,
    }
}

/// `plan.json`. The engine reads `tasks[].requiresTests`, `allowed_files`,
/// and `steps[].file`; everything else passes through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanArtifact {
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    #[serde(default)]
    pub allowed_files: Vec<String>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "requiresTests")]
    pub requires_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub file: String,
    #[serde(default)]
    pub description: String,
}

impl PlanArtifact {
    /// True when any planned task asks for tests.
    pub fn requires_tests(&self) -> bool {
        self.tasks.iter().any(|task| task.requires_tests)
    }
}

/// One mutation proposed by the implementor for a single step. The executor
/// returns either explicit file actions or a unified diff; the engine
/// rejects results carrying neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImplementorStepResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<FileAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAction {
    pub path: String,
    pub action: FileActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileActionKind {
    Write,
    Delete,
}

/// `implementor.json`, written after all steps complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementorArtifact {
    pub task_id: String,
    pub steps: Vec<StepOutcome>,
    pub changed_files: Vec<String>,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// `review.json`. Only `decision` drives the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewArtifact {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// `test.json`. The run proceeds only when `status == "passed"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestArtifact {
    pub status: String,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl TestArtifact {
    pub const STATUS_PASSED: &'static str = "passed";

    pub fn passed(&self) -> bool {
        self.status == Self::STATUS_PASSED
    }

    /// Synthetic result used when the plan declared no behavior-changing
    /// work and the test phase is skipped.
    pub fn skipped_passed() -> Self {
        Self {
            status: Self::STATUS_PASSED.to_string(),
            skipped: true,
            command: None,
            output: Some("No behavior change planned; tests skipped.".to_string()),
        }
    }
}

/// `pr-draft.json`, the terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrDraft {
    pub task_id: String,
    pub status: String,
    pub repo: PrDraftRepo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrDraftRepo {
    pub root: String,
    pub branch: String,
    pub base_branch: String,
}

impl PrDraft {
    pub const STATUS_READY: &'static str = "ready_for_review";
}

/// `*.error.json` sibling recording a failed executor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorArtifact {
    pub phase: Phase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The working document handed to the implementor, reviewer, and tester:
/// the plan plus the current on-disk content of every allowed file, along
/// with reviewer feedback and the implementor result once they exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementorHandoff {
    pub task_id: String,
    pub prompt: String,
    pub plan: PlanArtifact,
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementor: Option<ImplementorArtifact>,
}
