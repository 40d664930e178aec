use std::collections::BTreeSet;

use anyhow::Result;
use chrono::Utc;
use concerto_protocol::JobStatus;
use sqlx::QueryBuilder;
use sqlx::Row;
use sqlx::Sqlite;

use crate::STALE_JOB_ERROR;
use crate::model::RecoveredStale;

use super::QueueStore;
use super::is_stale;
use super::now_rfc3339;

impl QueueStore {
    /// Requeue stale `in_progress` jobs and drop the leases that go with
    /// them.
    ///
    /// One transaction is the linearization point: it requeues every
    /// in-progress job whose heartbeat is older than the lease timeout,
    /// then deletes each lease that is either stale itself or belongs to
    /// a run whose job was just recovered. Either condition alone
    /// releases a lease. After commit, every live in-progress job has a
    /// live lease again. Idempotent: a second sweep on the same state
    /// reports zeros.
    pub async fn recover_stale(&self) -> Result<RecoveredStale> {
        let now = now_rfc3339();
        let now_millis = Utc::now().timestamp_millis();
        let lease_timeout_millis = self.lease_timeout_millis();
        let mut tx = self.pool().begin_with("BEGIN IMMEDIATE").await?;

        let in_progress = sqlx::query(
            r#"
SELECT id, run_id, updated_at
FROM jobs
WHERE status = ?
            "#,
        )
        .bind(JobStatus::InProgress.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut stale_job_ids: Vec<i64> = Vec::new();
        let mut recovered_runs: BTreeSet<String> = BTreeSet::new();
        for row in &in_progress {
            let updated_at: String = row.try_get("updated_at")?;
            if is_stale(updated_at.as_str(), now_millis, lease_timeout_millis) {
                stale_job_ids.push(row.try_get("id")?);
                recovered_runs.insert(row.try_get("run_id")?);
            }
        }

        let requeued_jobs = if stale_job_ids.is_empty() {
            0
        } else {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE jobs SET status = ");
            builder.push_bind(JobStatus::Queued.as_str());
            builder.push(", updated_at = ");
            builder.push_bind(now.as_str());
            builder.push(", last_error = COALESCE(last_error, ");
            builder.push_bind(STALE_JOB_ERROR);
            builder.push(") WHERE id IN (");
            let mut separated = builder.separated(", ");
            for job_id in &stale_job_ids {
                separated.push_bind(job_id);
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?.rows_affected()
        };

        let leases = sqlx::query(
            r#"
SELECT run_id, locked_at
FROM run_locks
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut doomed_leases = recovered_runs;
        for row in &leases {
            let locked_at: String = row.try_get("locked_at")?;
            if is_stale(locked_at.as_str(), now_millis, lease_timeout_millis) {
                doomed_leases.insert(row.try_get("run_id")?);
            }
        }

        let released_leases = if doomed_leases.is_empty() {
            0
        } else {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM run_locks WHERE run_id IN (");
            let mut separated = builder.separated(", ");
            for run_id in &doomed_leases {
                separated.push_bind(run_id.as_str());
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?.rows_affected()
        };

        tx.commit().await?;
        Ok(RecoveredStale {
            requeued_jobs,
            released_leases,
        })
    }
}
