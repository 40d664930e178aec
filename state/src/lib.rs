//! SQLite-backed queue store for the Concerto pipeline.
//!
//! This crate is intentionally small and focused: it owns the `jobs` and
//! `run_locks` tables and exposes the durable queue operations the worker
//! loop is built on: enqueue, single-claim, ack/fail, heartbeat, run
//! leases, cancellation, and stale recovery. Run handoffs and artifacts
//! live on the filesystem and are managed by `concerto-core`.

mod migrations;
mod model;
mod runtime;

pub use model::Job;
pub use model::QueueStats;
pub use model::RecoveredStale;
pub use model::RunLock;
/// Preferred entrypoint: owns the pool and the lease tunables.
pub use runtime::QueueStore;
pub use runtime::Tunables;
pub use runtime::queue_db_path;

pub const QUEUE_DB_FILENAME: &str = "queue.db";

/// Default error recorded on jobs requeued by the recovery sweeper.
pub const STALE_JOB_ERROR: &str = "Recovered stale in_progress job.";
