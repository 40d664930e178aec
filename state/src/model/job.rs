use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use concerto_protocol::JobStatus;
use concerto_protocol::Phase;

/// One durable unit of work: a single phase of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub run_id: String,
    pub phase: Phase,
    pub status: JobStatus,
    pub attempt: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub queued: i64,
    pub in_progress: i64,
    pub lease_count: i64,
}

/// Counts reported by one recovery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveredStale {
    pub requeued_jobs: u64,
    pub released_leases: u64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub(crate) id: i64,
    pub(crate) run_id: String,
    pub(crate) phase: String,
    pub(crate) status: String,
    pub(crate) attempt: i64,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) last_error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(value: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            run_id: value.run_id,
            phase: Phase::parse(value.phase.as_str())?,
            status: JobStatus::parse(value.status.as_str())?,
            attempt: value.attempt,
            created_at: parse_rfc3339(value.created_at.as_str())?,
            updated_at: parse_rfc3339(value.updated_at.as_str())?,
            last_error: value.last_error,
        })
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|err| anyhow::anyhow!("invalid timestamp {value:?}: {err}"))?
        .with_timezone(&Utc))
}
