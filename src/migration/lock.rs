//! Per-partition run lock
//!
//! The store decides who wins (an advisory lock for [`TableMarkerStore`]); the winner holds
//! the partition until the guard is dropped or its connection closes. Losers poll every
//! 100ms until the timeout.
//!
//! [`TableMarkerStore`]: crate::migration::TableMarkerStore

use crate::executor::DbExecutor;
use crate::migration::marker::MarkerStore;
use crate::migration::MigrationError;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock guard that releases the partition when dropped
pub struct RunLockGuard<'a> {
    store: &'a dyn MarkerStore,
    executor: &'a dyn DbExecutor,
    partition: String,
    holder: String,
}

impl<'a> RunLockGuard<'a> {
    /// Acquire the run lock for `partition`
    ///
    /// A `timeout_seconds` of 0 makes a single attempt.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if another holder keeps the lock past the
    /// timeout, or a database error from the lock table.
    pub fn acquire(
        store: &'a dyn MarkerStore,
        executor: &'a dyn DbExecutor,
        partition: &str,
        holder: &str,
        timeout_seconds: u64,
    ) -> Result<Self, MigrationError> {
        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_seconds);

        loop {
            if store.try_lock(executor, partition, holder)? {
                log::debug!("Acquired run lock for partition '{partition}' as {holder}");
                return Ok(Self {
                    store,
                    executor,
                    partition: partition.to_string(),
                    holder: holder.to_string(),
                });
            }

            if start.elapsed() >= timeout {
                let owner = store
                    .lock_holder(executor, partition)?
                    .unwrap_or_else(|| "an unknown holder".to_string());
                return Err(MigrationError::LockTimeout(format!(
                    "partition '{partition}' is locked by {owner}; gave up after {timeout_seconds}s"
                )));
            }

            log::debug!("Run lock for partition '{partition}' is busy, retrying");
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock(self.executor, &self.partition, &self.holder) {
            log::warn!(
                "Failed to release run lock for partition '{}': {}",
                self.partition,
                e
            );
        }
    }
}

/// Holder id for this process: pid plus a random suffix
pub fn holder_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("pid-{}-{}", std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptExecutor;
    use crate::migration::marker::MemoryMarkerStore;

    #[test]
    fn test_guard_releases_on_drop() {
        let store = MemoryMarkerStore::new();
        let exec = ScriptExecutor::new();
        {
            let guard = RunLockGuard::acquire(&store, &exec, "default", "run-1", 0).unwrap();
            assert_eq!(guard.partition(), "default");
            assert!(store.lock_holder(&exec, "default").unwrap().is_some());
        }
        assert!(store.lock_holder(&exec, "default").unwrap().is_none());
    }

    #[test]
    fn test_busy_lock_times_out() {
        let store = MemoryMarkerStore::new();
        let exec = ScriptExecutor::new();
        let _held = RunLockGuard::acquire(&store, &exec, "default", "run-1", 0).unwrap();

        let err = RunLockGuard::acquire(&store, &exec, "default", "run-2", 0)
            .err()
            .unwrap();
        match err {
            MigrationError::LockTimeout(msg) => assert!(msg.contains("run-1")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_holder_ids_are_distinct() {
        assert_ne!(holder_id(), holder_id());
        assert!(holder_id().starts_with("pid-"));
    }
}
