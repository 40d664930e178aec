mod job;
mod lease;

pub use job::Job;
pub use job::QueueStats;
pub use job::RecoveredStale;
pub use lease::RunLock;

pub(crate) use job::JobRow;
pub(crate) use lease::RunLockRow;
