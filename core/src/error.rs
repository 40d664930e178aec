use concerto_git_tooling::GitToolingError;
use thiserror::Error;

/// Engine-level failure, bucketed by how the worker must react.
///
/// `Cancelled` marks the job failed without touching the (already
/// cancelled) handoff. `Validation`, `Executor`, `Git`, and `Json` are
/// terminal for the run: error artifact, failed handoff, failed job.
/// `Io` and `Storage` are operational: the job is requeued untouched and
/// retried under the attempt budget.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run cancelled.")]
    Cancelled,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Executor(String),
    #[error(transparent)]
    Git(#[from] GitToolingError),
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Operational faults are retried by requeueing rather than failing
    /// the run.
    pub fn is_operational(&self) -> bool {
        matches!(self, EngineError::Io(_) | EngineError::Storage(_))
    }
}
