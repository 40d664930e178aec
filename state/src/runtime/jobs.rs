use anyhow::Result;
use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use sqlx::Row;

use crate::model::Job;
use crate::model::JobRow;
use crate::model::QueueStats;

use super::QueueStore;
use super::now_rfc3339;

const SELECT_JOB_COLUMNS: &str = r#"
SELECT
    id,
    run_id,
    phase,
    status,
    attempt,
    created_at,
    updated_at,
    last_error
FROM jobs
"#;

impl QueueStore {
    /// Insert one queued job for `(run_id, phase)`.
    ///
    /// The store does not enforce the at-most-one-live-job-per-run
    /// invariant; callers keep it by only enqueuing the next phase after
    /// acking the previous one.
    pub async fn enqueue(&self, run_id: &str, phase: Phase) -> Result<Job> {
        let now = now_rfc3339();
        let result = sqlx::query(
            r#"
INSERT INTO jobs (run_id, phase, status, attempt, created_at, updated_at, last_error)
VALUES (?, ?, ?, 0, ?, ?, NULL)
            "#,
        )
        .bind(run_id)
        .bind(phase.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(now.as_str())
        .bind(now.as_str())
        .execute(self.pool())
        .await?;
        let job_id = result.last_insert_rowid();
        self.get_job(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to load enqueued job {job_id}"))
    }

    /// Claim the oldest queued job, if any.
    ///
    /// FIFO over `created_at` with ids breaking ties. The select and the
    /// status flip happen inside one immediate transaction, so for any
    /// number of concurrent callers each queued row is observed
    /// transitioning to `in_progress` by exactly one of them.
    pub async fn claim_one(&self) -> Result<Option<Job>> {
        let now = now_rfc3339();
        let mut tx = self.pool().begin_with("BEGIN IMMEDIATE").await?;
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "{SELECT_JOB_COLUMNS} WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT 1"
        ))
        .bind(JobStatus::Queued.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        sqlx::query(
            r#"
UPDATE jobs
SET status = ?, attempt = attempt + 1, updated_at = ?
WHERE id = ?
            "#,
        )
        .bind(JobStatus::InProgress.as_str())
        .bind(now.as_str())
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
        let claimed = sqlx::query_as::<_, JobRow>(&format!("{SELECT_JOB_COLUMNS} WHERE id = ?"))
            .bind(row.id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(Job::try_from(claimed)?))
    }

    /// Put a claimed job back in the queue (lease-denied path). The
    /// attempt count is deliberately preserved.
    pub async fn requeue(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, updated_at = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Queued.as_str())
        .bind(now_rfc3339().as_str())
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_done(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, updated_at = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Done.as_str())
        .bind(now_rfc3339().as_str())
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, job_id: i64, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, updated_at = ?, last_error = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(now_rfc3339().as_str())
        .bind(error_message)
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Heartbeat: bump `updated_at` without touching the status.
    pub async fn touch(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET updated_at = ?
WHERE id = ?
            "#,
        )
        .bind(now_rfc3339().as_str())
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record an observed cancellation on the job the worker was
    /// executing. The row is usually already `cancelled` (the cancel ran
    /// while the job was in flight), so unlike [`Self::mark_failed`]
    /// this accepts both live states and leaves the row `failed` with
    /// the cancellation message.
    pub async fn record_cancellation(&self, job_id: i64, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, updated_at = ?, last_error = ?
WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(now_rfc3339().as_str())
        .bind(message)
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .bind(JobStatus::Cancelled.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel every live job of a run. Terminal rows are left untouched.
    pub async fn cancel_run(&self, run_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, updated_at = ?
WHERE run_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(JobStatus::Cancelled.as_str())
        .bind(now_rfc3339().as_str())
        .bind(run_id)
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{SELECT_JOB_COLUMNS} WHERE id = ?"))
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(Job::try_from).transpose()
    }

    pub async fn jobs_for_run(&self, run_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{SELECT_JOB_COLUMNS} WHERE run_id = ? ORDER BY id ASC"
        ))
        .bind(run_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
SELECT
    SUM(CASE WHEN status = ? THEN 1 ELSE 0 END) AS queued,
    SUM(CASE WHEN status = ? THEN 1 ELSE 0 END) AS in_progress,
    (SELECT COUNT(*) FROM run_locks) AS lease_count
FROM jobs
            "#,
        )
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .fetch_one(self.pool())
        .await?;
        let queued: Option<i64> = row.try_get("queued")?;
        let in_progress: Option<i64> = row.try_get("in_progress")?;
        let lease_count: i64 = row.try_get("lease_count")?;
        Ok(QueueStats {
            queued: queued.unwrap_or_default(),
            in_progress: in_progress.unwrap_or_default(),
            lease_count,
        })
    }
}
