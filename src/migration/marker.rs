//! Applied-revision marker storage
//!
//! The marker is the set of head tokens applied to a partition (empty for an unmigrated
//! partition). Reads and writes that belong to a step take the step's executor so they join
//! its transaction. The run lock and the history log live behind the same trait.

use crate::executor::DbExecutor;
use crate::migration::record::HistoryEntry;
use crate::migration::MigrationError;
use std::cell::RefCell;
use std::collections::BTreeMap;

pub trait MarkerStore {
    /// Create the backing storage if needed
    fn ensure(&self, executor: &dyn DbExecutor) -> Result<(), MigrationError>;

    /// Current marker, without locking
    fn current(&self, executor: &dyn DbExecutor, partition: &str)
        -> Result<Vec<String>, MigrationError>;

    /// Current marker, locked until the executor's transaction ends
    fn current_for_update(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<String>, MigrationError>;

    /// Replace the marker
    fn write(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        heads: &[String],
    ) -> Result<(), MigrationError>;

    fn record(&self, executor: &dyn DbExecutor, entry: &HistoryEntry)
        -> Result<(), MigrationError>;

    /// History of a partition, oldest first
    fn history(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<HistoryEntry>, MigrationError>;

    /// Take the partition's run lock; `false` if someone else holds it
    fn try_lock(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<bool, MigrationError>;

    fn unlock(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<(), MigrationError>;

    /// Who holds the partition's run lock, if anyone
    fn lock_holder(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Option<String>, MigrationError>;
}

/// Marker store kept in memory
///
/// Ignores the executor, so writes are not rolled back with a failed transaction. Used by
/// tests and for planning without a database.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: RefCell<BTreeMap<String, Vec<String>>>,
    locks: RefCell<BTreeMap<String, String>>,
    history: RefCell<Vec<HistoryEntry>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a partition's marker directly
    pub fn set(&self, partition: &str, heads: &[&str]) {
        self.markers.borrow_mut().insert(
            partition.to_string(),
            heads.iter().map(|h| h.to_string()).collect(),
        );
    }

    pub fn get(&self, partition: &str) -> Vec<String> {
        self.markers
            .borrow()
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.history.borrow().clone()
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn ensure(&self, _executor: &dyn DbExecutor) -> Result<(), MigrationError> {
        Ok(())
    }

    fn current(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<String>, MigrationError> {
        Ok(self.get(partition))
    }

    fn current_for_update(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<String>, MigrationError> {
        Ok(self.get(partition))
    }

    fn write(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
        heads: &[String],
    ) -> Result<(), MigrationError> {
        let mut markers = self.markers.borrow_mut();
        if heads.is_empty() {
            markers.remove(partition);
        } else {
            markers.insert(partition.to_string(), heads.to_vec());
        }
        Ok(())
    }

    fn record(
        &self,
        _executor: &dyn DbExecutor,
        entry: &HistoryEntry,
    ) -> Result<(), MigrationError> {
        self.history.borrow_mut().push(entry.clone());
        Ok(())
    }

    fn history(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<HistoryEntry>, MigrationError> {
        Ok(self
            .history
            .borrow()
            .iter()
            .filter(|e| e.partition == partition)
            .cloned()
            .collect())
    }

    fn try_lock(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<bool, MigrationError> {
        let mut locks = self.locks.borrow_mut();
        if locks.contains_key(partition) {
            return Ok(false);
        }
        locks.insert(partition.to_string(), holder.to_string());
        Ok(true)
    }

    fn unlock(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<(), MigrationError> {
        let mut locks = self.locks.borrow_mut();
        if locks.get(partition).map(String::as_str) == Some(holder) {
            locks.remove(partition);
        }
        Ok(())
    }

    fn lock_holder(
        &self,
        _executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Option<String>, MigrationError> {
        Ok(self.locks.borrow().get(partition).cloned())
    }
}
