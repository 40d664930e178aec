#[cfg(test)]
use std::path::PathBuf;
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use std::time::SystemTime;
#[cfg(test)]
use std::time::UNIX_EPOCH;
#[cfg(test)]
use uuid::Uuid;

#[cfg(test)]
use super::QueueStore;
#[cfg(test)]
use super::Tunables;

#[cfg(test)]
pub(super) struct TempStoreDir {
    path: PathBuf,
}

#[cfg(test)]
impl Drop for TempStoreDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
fn unique_temp_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    std::env::temp_dir().join(format!("concerto-state-test-{nanos}-{}", Uuid::new_v4()))
}

#[cfg(test)]
pub(super) async fn open_test_store() -> (QueueStore, TempStoreDir) {
    open_test_store_with_lease_timeout(Duration::from_secs(300)).await
}

#[cfg(test)]
pub(super) async fn open_test_store_with_lease_timeout(
    lease_timeout: Duration,
) -> (QueueStore, TempStoreDir) {
    let path = unique_temp_dir();
    let store = QueueStore::open(&path.join("queue.db"), Tunables { lease_timeout })
        .await
        .expect("open queue store");
    (store, TempStoreDir { path })
}
