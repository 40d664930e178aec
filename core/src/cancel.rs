use chrono::Utc;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::RunStatus;
use concerto_state::QueueStore;
use tracing::info;

use crate::config::Config;
use crate::error::EngineError;
use crate::handoff_io::read_handoff;
use crate::handoff_io::write_handoff;

/// Cancel a run: all live jobs become `cancelled`, the lease is dropped
/// unconditionally, and the handoff is rewritten so the in-flight worker
/// (if any) aborts at its next handoff read. Safe to call repeatedly.
pub async fn cancel_run(
    config: &Config,
    store: &QueueStore,
    run_id: &str,
) -> Result<(), EngineError> {
    let cancelled_jobs = store.cancel_run(run_id).await?;
    store.force_release_lease(run_id).await?;
    info!(run_id, cancelled_jobs, "run cancelled");

    let run_dir = config.run_dir(run_id);
    let handoff = match read_handoff(&run_dir).await {
        Ok(handoff) => handoff,
        // No (readable) handoff to annotate; the queue rows are already
        // cancelled, which is all the worker needs.
        Err(EngineError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if handoff.state.status == RunStatus::Cancelled {
        return Ok(());
    }
    let phase = handoff.state.phase;
    let updated = handoff.update(HandoffUpdate {
        phase,
        status: RunStatus::Cancelled,
        artifact: String::new(),
        ended_at: Utc::now(),
        next: None,
        artifacts: None,
        note: Some("Cancelled by user.".to_string()),
    });
    write_handoff(&run_dir, &updated).await
}
