use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

/// Exclusive tenancy of one run by one worker, bounded by the lease
/// timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLock {
    pub run_id: String,
    pub locked_at: DateTime<Utc>,
    pub owner: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunLockRow {
    pub(crate) run_id: String,
    pub(crate) locked_at: String,
    pub(crate) owner: String,
}

impl TryFrom<RunLockRow> for RunLock {
    type Error = anyhow::Error;

    fn try_from(value: RunLockRow) -> Result<Self, Self::Error> {
        let locked_at = DateTime::parse_from_rfc3339(value.locked_at.as_str())
            .map_err(|err| anyhow::anyhow!("invalid timestamp {:?}: {err}", value.locked_at))?
            .with_timezone(&Utc);
        Ok(Self {
            run_id: value.run_id,
            locked_at,
            owner: value.owner,
        })
    }
}
