use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::phase::Phase;
use crate::phase::RunStatus;

/// The per-run handoff document, persisted as `<run_dir>/handoff.json`.
///
/// The engine treats this document as the authoritative record of a run's
/// progress. All transforms are pure: they consume a handoff by value and
/// return the updated document, leaving history append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandoff {
    pub run: RunInfo,
    pub task: TaskInfo,
    pub state: RunState,
    pub artifacts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextAction>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub repo: RepoInfo,
    pub keep_workspace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    /// Absolute workspace path; empty until `plan` clones the repository.
    pub root: String,
    /// Active work branch; empty until `plan` creates it.
    pub branch: String,
    /// Base branch the work branch was cut from; empty means "default".
    pub base_branch: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub prompt: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub phase: Phase,
    pub status: RunStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub phase: Phase,
    pub status: RunStatus,
    pub ended_at: DateTime<Utc>,
    pub artifact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_tests_for_behavior_change: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAction {
    pub agent: String,
    #[serde(default)]
    pub input_artifacts: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

pub struct CreateQueuedParams {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub repo: RepoInfo,
    pub keep_workspace: bool,
    pub task_id: String,
    pub prompt: String,
    pub mode: String,
    pub artifacts: BTreeMap<String, String>,
    pub next: NextAction,
    pub max_iterations: u32,
}

/// Partial update applied by [`RunHandoff::update`].
///
/// `next` always replaces the current value; passing `None` removes the
/// key, which is how terminal transitions drop the pointer.
pub struct HandoffUpdate {
    pub phase: Phase,
    pub status: RunStatus,
    pub artifact: String,
    pub ended_at: DateTime<Utc>,
    pub next: Option<NextAction>,
    pub artifacts: Option<BTreeMap<String, String>>,
    pub note: Option<String>,
}

impl RunHandoff {
    pub fn create_queued(params: CreateQueuedParams) -> Self {
        let CreateQueuedParams {
            run_id,
            created_at,
            repo,
            keep_workspace,
            task_id,
            prompt,
            mode,
            artifacts,
            next,
            max_iterations,
        } = params;
        Self {
            run: RunInfo {
                id: run_id,
                created_at,
                repo,
                keep_workspace,
            },
            task: TaskInfo {
                id: task_id,
                prompt,
                mode,
            },
            state: RunState {
                phase: Phase::Plan,
                status: RunStatus::Queued,
                iteration: 1,
                max_iterations,
                history: Vec::new(),
            },
            artifacts,
            constraints: None,
            next: Some(next),
            notes: Vec::new(),
        }
    }

    /// Append one history entry, never mutating in place.
    pub fn append_history(mut self, entry: HistoryEntry) -> Self {
        self.state.history.push(entry);
        self
    }

    /// Apply a phase transition: appends to history, moves `state.phase`
    /// and `state.status`, merges artifact names, replaces `next`, and
    /// records an optional note.
    pub fn update(mut self, update: HandoffUpdate) -> Self {
        let HandoffUpdate {
            phase,
            status,
            artifact,
            ended_at,
            next,
            artifacts,
            note,
        } = update;
        self.state.history.push(HistoryEntry {
            phase,
            status,
            ended_at,
            artifact,
        });
        self.state.phase = phase;
        self.state.status = status;
        if let Some(artifacts) = artifacts {
            self.artifacts.extend(artifacts);
        }
        self.next = next;
        if let Some(note) = note {
            self.notes.push(note);
        }
        self
    }
}

fn is_string_list(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

/// Boundary validator for untyped handoff documents.
///
/// Accepts any JSON object that carries the required fields with the
/// required shapes; extra fields are tolerated so newer writers stay
/// readable by older engines.
pub fn is_run_handoff(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    if !object.get("run").is_some_and(Value::is_object) {
        return false;
    }
    if !object.get("task").is_some_and(Value::is_object) {
        return false;
    }
    let Some(state) = object.get("state").and_then(Value::as_object) else {
        return false;
    };
    if !state.get("phase").is_some_and(Value::is_string)
        || !state.get("status").is_some_and(Value::is_string)
        || !state.get("iteration").is_some_and(Value::is_u64)
        || !state.get("maxIterations").is_some_and(Value::is_u64)
        || !state.get("history").is_some_and(Value::is_array)
    {
        return false;
    }
    if !object.get("artifacts").is_some_and(Value::is_object) {
        return false;
    }
    if !object.get("notes").is_some_and(is_string_list) {
        return false;
    }
    match object.get("next") {
        None | Some(Value::Null) => true,
        Some(next) => {
            let Some(next) = next.as_object() else {
                return false;
            };
            next.get("agent").is_some_and(Value::is_string)
                && next.get("inputArtifacts").is_some_and(is_string_list)
                && next.get("instructions").is_some_and(is_string_list)
        }
    }
}
