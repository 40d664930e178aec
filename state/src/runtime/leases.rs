use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use crate::model::RunLock;
use crate::model::RunLockRow;

use super::QueueStore;
use super::is_stale;
use super::now_rfc3339;

impl QueueStore {
    /// Try to take exclusive tenancy of a run.
    ///
    /// Returns true when the caller now owns the lease: either no lease
    /// row existed, or the existing one had gone stale and was seized.
    /// A live lease held by anyone (including the caller) is not
    /// re-entered; the worker re-acquires only through release.
    pub async fn acquire_lease(&self, run_id: &str, owner: &str) -> Result<bool> {
        let now = now_rfc3339();
        let now_millis = Utc::now().timestamp_millis();
        let mut tx = self.pool().begin_with("BEGIN IMMEDIATE").await?;
        let existing = sqlx::query(
            r#"
SELECT locked_at
FROM run_locks
WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let acquired = match existing {
            None => {
                sqlx::query(
                    r#"
INSERT INTO run_locks (run_id, locked_at, owner)
VALUES (?, ?, ?)
                    "#,
                )
                .bind(run_id)
                .bind(now.as_str())
                .bind(owner)
                .execute(&mut *tx)
                .await?;
                true
            }
            Some(row) => {
                let locked_at: String = row.try_get("locked_at")?;
                if is_stale(locked_at.as_str(), now_millis, self.lease_timeout_millis()) {
                    sqlx::query(
                        r#"
UPDATE run_locks
SET locked_at = ?, owner = ?
WHERE run_id = ?
                        "#,
                    )
                    .bind(now.as_str())
                    .bind(owner)
                    .bind(run_id)
                    .execute(&mut *tx)
                    .await?;
                    true
                } else {
                    false
                }
            }
        };
        tx.commit().await?;
        Ok(acquired)
    }

    /// Release the lease iff `owner` still holds it.
    pub async fn release_lease(&self, run_id: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
DELETE FROM run_locks
WHERE run_id = ? AND owner = ?
            "#,
        )
        .bind(run_id)
        .bind(owner)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Heartbeat the lease iff `owner` still holds it.
    pub async fn touch_lease(&self, run_id: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE run_locks
SET locked_at = ?
WHERE run_id = ? AND owner = ?
            "#,
        )
        .bind(now_rfc3339().as_str())
        .bind(run_id)
        .bind(owner)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unconditional delete, used on the cancellation path.
    pub async fn force_release_lease(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
DELETE FROM run_locks
WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_lease(&self, run_id: &str) -> Result<Option<RunLock>> {
        let row = sqlx::query_as::<_, RunLockRow>(
            r#"
SELECT run_id, locked_at, owner
FROM run_locks
WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(RunLock::try_from).transpose()
    }
}
