use std::sync::Arc;

use chrono::Utc;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use concerto_protocol::error_artifact_name;
use concerto_state::Job;
use concerto_state::QueueStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::agents::PhaseAgents;
use crate::artifacts::write_error_artifact;
use crate::config::Config;
use crate::error::EngineError;
use crate::handoff_io::read_handoff;
use crate::handoff_io::write_handoff;
use crate::phases;
use crate::workspace::WorkspaceOps;

pub const CANCELLED_MESSAGE: &str = "Run cancelled.";
const MAX_ATTEMPTS_MESSAGE: &str = "Max attempts exceeded.";

/// What one worker iteration did. Returned by [`Worker::run_once`] so
/// tests (and the loop's pacing) can observe the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTick {
    /// Nothing queued.
    Idle,
    /// A job finished; `next` was enqueued after the ack.
    Processed {
        job_id: i64,
        run_id: String,
        phase: Phase,
        next: Option<Phase>,
    },
    /// Another worker holds the run; the job went back to the queue.
    LeaseDenied { job_id: i64, run_id: String },
    /// Operational fault mid-phase; the job went back to the queue with
    /// its attempt count intact.
    Requeued { job_id: i64, run_id: String },
    /// The claim would have exceeded the attempt budget.
    MaxAttemptsExceeded { job_id: i64, run_id: String },
    /// The phase failed (or observed cancellation); the job is failed.
    Failed {
        job_id: i64,
        run_id: String,
        message: String,
    },
}

/// One long-lived queue consumer.
///
/// Internally single-threaded for the critical path: claim → lease →
/// execute → ack, one job at a time. Parallelism comes from running
/// several workers, which coordinate purely through the queue store.
pub struct Worker {
    store: QueueStore,
    config: Config,
    agents: Arc<dyn PhaseAgents>,
    workspace: Arc<dyn WorkspaceOps>,
    owner: String,
}

impl Worker {
    pub fn new(
        store: QueueStore,
        config: Config,
        agents: Arc<dyn PhaseAgents>,
        workspace: Arc<dyn WorkspaceOps>,
    ) -> Self {
        Self {
            store,
            config,
            agents,
            workspace,
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Run until SIGINT/SIGTERM. In-flight phase execution is never
    /// preempted; shutdown lands between iterations.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            match wait_for_shutdown().await {
                Ok(()) => {
                    let _ = shutdown_tx.send(true);
                }
                Err(err) => warn!("failed to install signal handlers: {err}"),
            }
        });

        info!(owner = self.owner.as_str(), "worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let delay = match self.run_once().await {
                Ok(WorkerTick::Idle) => Some(self.config.poll_interval),
                Ok(_) => None,
                Err(err) => {
                    warn!("worker iteration failed: {err:#}");
                    Some(self.config.poll_interval)
                }
            };
            if let Some(delay) = delay {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        info!(owner = self.owner.as_str(), "worker stopped");
        Ok(())
    }

    /// One full cycle: recover, claim, lease, execute, ack, release.
    pub async fn run_once(&self) -> anyhow::Result<WorkerTick> {
        let recovered = self.store.recover_stale().await?;
        if recovered.requeued_jobs > 0 || recovered.released_leases > 0 {
            warn!(
                requeued_jobs = recovered.requeued_jobs,
                released_leases = recovered.released_leases,
                "recovered stale queue state"
            );
        }

        let Some(job) = self.store.claim_one().await? else {
            return Ok(WorkerTick::Idle);
        };

        if job.attempt > self.config.max_attempts {
            self.store.mark_failed(job.id, MAX_ATTEMPTS_MESSAGE).await?;
            self.fail_handoff(&job, MAX_ATTEMPTS_MESSAGE).await;
            error!(
                run_id = job.run_id.as_str(),
                phase = %job.phase,
                attempt = job.attempt,
                "job exceeded its attempt budget"
            );
            return Ok(WorkerTick::MaxAttemptsExceeded {
                job_id: job.id,
                run_id: job.run_id,
            });
        }

        if !self.store.acquire_lease(job.run_id.as_str(), self.owner.as_str()).await? {
            self.store.requeue(job.id).await?;
            tokio::time::sleep(self.config.requeue_sleep).await;
            return Ok(WorkerTick::LeaseDenied {
                job_id: job.id,
                run_id: job.run_id,
            });
        }

        let heartbeat = self.spawn_heartbeat(job.id, job.run_id.clone());
        let outcome = phases::execute(
            &self.config,
            self.agents.as_ref(),
            self.workspace.as_ref(),
            job.run_id.as_str(),
            job.phase,
        )
        .await;
        heartbeat.abort();

        let tick = self.finish_job(&job, outcome).await;
        if let Err(err) = self
            .store
            .release_lease(job.run_id.as_str(), self.owner.as_str())
            .await
        {
            warn!(run_id = job.run_id.as_str(), "failed to release lease: {err:#}");
        }
        tick
    }

    /// Ack/fail the job according to the phase outcome. The next phase
    /// is enqueued only after the finished job is terminal, keeping at
    /// most one live job per run.
    async fn finish_job(
        &self,
        job: &Job,
        outcome: Result<phases::PhaseOutcome, EngineError>,
    ) -> anyhow::Result<WorkerTick> {
        match outcome {
            Ok(phases::PhaseOutcome { next }) => {
                // A false ack means the job was cancelled under us while
                // the phase ran; the run must not advance.
                let acked = self.store.mark_done(job.id).await?;
                if acked && let Some(phase) = next {
                    self.store.enqueue(job.run_id.as_str(), phase).await?;
                }
                info!(
                    run_id = job.run_id.as_str(),
                    phase = %job.phase,
                    next = next.map(Phase::as_str),
                    "phase completed"
                );
                Ok(WorkerTick::Processed {
                    job_id: job.id,
                    run_id: job.run_id.clone(),
                    phase: job.phase,
                    next,
                })
            }
            Err(EngineError::Cancelled) => {
                self.store
                    .record_cancellation(job.id, CANCELLED_MESSAGE)
                    .await?;
                info!(
                    run_id = job.run_id.as_str(),
                    phase = %job.phase,
                    "cancellation observed"
                );
                Ok(WorkerTick::Failed {
                    job_id: job.id,
                    run_id: job.run_id.clone(),
                    message: CANCELLED_MESSAGE.to_string(),
                })
            }
            Err(err) if err.is_operational() => {
                warn!(
                    run_id = job.run_id.as_str(),
                    phase = %job.phase,
                    "transient fault; requeueing: {err}"
                );
                self.store.requeue(job.id).await?;
                Ok(WorkerTick::Requeued {
                    job_id: job.id,
                    run_id: job.run_id.clone(),
                })
            }
            Err(err) => {
                let message = err.to_string();
                error!(
                    run_id = job.run_id.as_str(),
                    phase = %job.phase,
                    "phase failed: {message}"
                );
                self.store.mark_failed(job.id, message.as_str()).await?;
                let run_dir = self.config.run_dir(job.run_id.as_str());
                if let Err(artifact_err) =
                    write_error_artifact(&run_dir, job.phase, message.as_str()).await
                {
                    warn!(
                        run_id = job.run_id.as_str(),
                        "failed to write error artifact: {artifact_err}"
                    );
                }
                self.fail_handoff(job, message.as_str()).await;
                Ok(WorkerTick::Failed {
                    job_id: job.id,
                    run_id: job.run_id.clone(),
                    message,
                })
            }
        }
    }

    /// Best-effort terminal failure record on the handoff. A handoff
    /// already marked cancelled is preserved as-is.
    async fn fail_handoff(&self, job: &Job, message: &str) {
        let run_dir = self.config.run_dir(job.run_id.as_str());
        let handoff = match read_handoff(&run_dir).await {
            Ok(handoff) => handoff,
            Err(err) => {
                warn!(
                    run_id = job.run_id.as_str(),
                    "failed to read handoff while failing the run: {err}"
                );
                return;
            }
        };
        if handoff.state.status == RunStatus::Cancelled {
            return;
        }
        let updated = handoff.update(HandoffUpdate {
            phase: job.phase,
            status: RunStatus::Failed,
            artifact: error_artifact_name(job.phase),
            ended_at: Utc::now(),
            next: None,
            artifacts: None,
            note: Some(message.to_string()),
        });
        if let Err(err) = write_handoff(&run_dir, &updated).await {
            warn!(
                run_id = job.run_id.as_str(),
                "failed to write failed handoff: {err}"
            );
        }
    }

    /// Periodically refresh the job row and the lease so neither goes
    /// stale while a long phase runs. Aborted by the caller.
    fn spawn_heartbeat(&self, job_id: i64, run_id: String) -> JoinHandle<()> {
        let store = self.store.clone();
        let owner = self.owner.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the claim already
            // stamped both timestamps.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = store.touch(job_id).await {
                    warn!(job_id, "heartbeat touch failed: {err:#}");
                }
                if let Err(err) = store.touch_lease(run_id.as_str(), owner.as_str()).await {
                    warn!(run_id = run_id.as_str(), "lease heartbeat failed: {err:#}");
                }
            }
        })
    }
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
