//! Wire and document types shared across the Concerto pipeline.
//!
//! This crate is intentionally free of I/O: it defines the phase and status
//! enums, the per-run handoff document together with its pure transforms,
//! the typed phase artifacts, and the task-input resolution rules. Anything
//! that touches the queue database or the filesystem lives in
//! `concerto-state` and `concerto-core`.

mod artifacts;
mod handoff;
mod phase;
mod task_input;

pub use artifacts::ARTIFACT_IMPLEMENTOR;
pub use artifacts::ARTIFACT_PLAN;
pub use artifacts::ARTIFACT_PR_DRAFT;
pub use artifacts::ARTIFACT_REVIEW;
pub use artifacts::ARTIFACT_TEST;
pub use artifacts::ErrorArtifact;
pub use artifacts::FileAction;
pub use artifacts::FileActionKind;
pub use artifacts::ImplementorArtifact;
pub use artifacts::ImplementorHandoff;
pub use artifacts::ImplementorStepResult;
pub use artifacts::PlanArtifact;
pub use artifacts::PlanStep;
pub use artifacts::PlanTask;
pub use artifacts::PrDraft;
pub use artifacts::PrDraftRepo;
pub use artifacts::ReviewArtifact;
pub use artifacts::StepOutcome;
pub use artifacts::TestArtifact;
pub use artifacts::canonical_artifacts;
pub use artifacts::error_artifact_name;
pub use artifacts::handoff_snapshot_name;
pub use handoff::Constraints;
pub use handoff::CreateQueuedParams;
pub use handoff::HandoffUpdate;
pub use handoff::HistoryEntry;
pub use handoff::NextAction;
pub use handoff::RepoInfo;
pub use handoff::RunHandoff;
pub use handoff::RunInfo;
pub use handoff::RunState;
pub use handoff::TaskInfo;
pub use handoff::is_run_handoff;
pub use phase::JobStatus;
pub use phase::Phase;
pub use phase::ProtocolError;
pub use phase::ReviewDecision;
pub use phase::RunStatus;
pub use task_input::TaskInputError;
pub use task_input::resolve_task_input;

/// Agent designations as they appear in `next.agent`.
pub const AGENT_PLANNER: &str = "planner";
pub const AGENT_IMPLEMENTER: &str = "implementer";
pub const AGENT_REVIEWER: &str = "reviewer";
pub const AGENT_TESTER: &str = "tester";
/// The pr phase is engine-internal but the pointer stays well-formed.
pub const AGENT_PR: &str = "pr";
