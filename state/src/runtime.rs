use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use tracing::warn;

use crate::QUEUE_DB_FILENAME;
use crate::migrations::MIGRATOR;

mod jobs;
mod leases;
mod recovery;
#[cfg(test)]
mod test_support;

/// Knobs the worker and the tests need to agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// A job or lease whose last timestamp is older than this is stale.
    pub lease_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Durable queue store over a single SQLite database.
///
/// All mutation of shared state goes through this type; each operation is
/// a transaction, and the claim-shaped ones take the write lock up front
/// (`BEGIN IMMEDIATE`) so that concurrent workers serialize on the store
/// rather than on in-process locks.
#[derive(Clone)]
pub struct QueueStore {
    pool: Arc<SqlitePool>,
    tunables: Tunables,
}

impl QueueStore {
    /// Open (and migrate) the queue database at `db_path`.
    pub async fn open(db_path: &Path, tunables: Tunables) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = match open_sqlite(db_path).await {
            Ok(pool) => Arc::new(pool),
            Err(err) => {
                warn!("failed to open queue db at {}: {err}", db_path.display());
                return Err(err);
            }
        };
        Ok(Self { pool, tunables })
    }

    pub fn tunables(&self) -> Tunables {
        self.tunables
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    pub(crate) fn lease_timeout_millis(&self) -> i64 {
        i64::try_from(self.tunables.lease_timeout.as_millis()).unwrap_or(i64::MAX)
    }
}

async fn open_sqlite(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .log_statements(LevelFilter::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub fn queue_db_path(root: &Path) -> PathBuf {
    root.join(QUEUE_DB_FILENAME)
}

/// Timestamps are stored as RFC 3339 UTC strings. A fixed millisecond
/// format keeps lexicographic and chronological order identical, which
/// `ORDER BY created_at` relies on.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn timestamp_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

/// A record is stale once its timestamp is older than the lease timeout.
/// Unparseable timestamps are treated as stale, which errs toward
/// recovering the work rather than stranding it.
pub(crate) fn is_stale(timestamp: &str, now_millis: i64, lease_timeout_millis: i64) -> bool {
    match timestamp_millis(timestamp) {
        Some(millis) => now_millis.saturating_sub(millis) > lease_timeout_millis,
        None => true,
    }
}
