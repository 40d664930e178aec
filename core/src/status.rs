use concerto_protocol::HistoryEntry;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;

use crate::config::Config;
use crate::error::EngineError;
use crate::handoff_io::read_handoff;

/// One-shot view of a run, derived entirely from its handoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    pub run_id: String,
    pub phase: Phase,
    pub status: RunStatus,
    pub iteration: u32,
    pub last_entry: Option<HistoryEntry>,
    pub notes: Vec<String>,
}

pub async fn run_view(config: &Config, run_id: &str) -> Result<RunView, EngineError> {
    let handoff = read_handoff(&config.run_dir(run_id)).await?;
    Ok(RunView {
        run_id: handoff.run.id,
        phase: handoff.state.phase,
        status: handoff.state.status,
        iteration: handoff.state.iteration,
        last_entry: handoff.state.history.last().cloned(),
        notes: handoff.notes,
    })
}

/// Views for every run directory under `<root>/runs`, oldest first.
/// Unreadable or foreign directories are skipped rather than failing
/// the listing.
pub async fn list_runs(config: &Config) -> Result<Vec<RunView>, EngineError> {
    let runs_dir = config.runs_dir();
    let mut entries = match tokio::fs::read_dir(&runs_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut run_ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await.map(|kind| kind.is_dir()).unwrap_or(false) {
            run_ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    // Run ids are time-ordered, so the sort doubles as submission order.
    run_ids.sort();

    let mut views = Vec::new();
    for run_id in run_ids {
        if let Ok(view) = run_view(config, run_id.as_str()).await {
            views.push(view);
        }
    }
    Ok(views)
}
