//! Migration state tables
//!
//! Three tables per datastore, created on bootstrap with `IF NOT EXISTS`:
//!
//! - version: one row per (partition, head token); no rows means nothing applied
//! - lock: who holds or last held a partition's run lock
//! - history: one row per committed step
//!
//! The run lock itself is a session-level advisory lock, so PostgreSQL releases it when the
//! holder's connection goes away. The lock row only names the holder.

use crate::config::MigrateConfig;
use crate::executor::DbExecutor;
use crate::migration::marker::MarkerStore;
use crate::migration::record::HistoryEntry;
use crate::migration::schema_manager::quote_ident;
use crate::migration::MigrationError;
use sea_query::Value;

/// [`MarkerStore`] backed by the state tables
#[derive(Debug, Clone)]
pub struct TableMarkerStore {
    version_table: String,
    lock_table: String,
    history_table: String,
}

impl Default for TableMarkerStore {
    fn default() -> Self {
        Self::from_config(&MigrateConfig::default())
    }
}

impl TableMarkerStore {
    pub fn new(version_table: &str, lock_table: &str, history_table: &str) -> Self {
        Self {
            version_table: version_table.to_string(),
            lock_table: lock_table.to_string(),
            history_table: history_table.to_string(),
        }
    }

    pub fn from_config(config: &MigrateConfig) -> Self {
        Self::new(
            &config.version_table,
            &config.lock_table,
            &config.history_table,
        )
    }

    /// Bootstrap DDL, in execution order
    pub fn bootstrap_statements(&self) -> Vec<String> {
        let version = quote_ident(&self.version_table);
        let lock = quote_ident(&self.lock_table);
        let history = quote_ident(&self.history_table);
        let history_index = quote_ident(&format!("idx_{}_partition", self.history_table));

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {version} (\
                 partition VARCHAR(255) NOT NULL, \
                 revision VARCHAR(255) NOT NULL, \
                 PRIMARY KEY (partition, revision))"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {lock} (\
                 partition VARCHAR(255) PRIMARY KEY, \
                 holder VARCHAR(255) NOT NULL, \
                 acquired_at TIMESTAMP NOT NULL DEFAULT NOW())"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {history} (\
                 id BIGSERIAL PRIMARY KEY, \
                 partition VARCHAR(255) NOT NULL, \
                 revision VARCHAR(255) NOT NULL, \
                 direction VARCHAR(16) NOT NULL, \
                 checksum VARCHAR(64) NOT NULL, \
                 applied_at TIMESTAMP NOT NULL, \
                 execution_time_ms BIGINT)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {history_index} ON {history} (partition, applied_at)"),
        ]
    }

    /// Advisory lock key; the lock table name keeps separate stores apart
    fn lock_key(&self, partition: &str) -> Value {
        Value::String(Some(format!("{}:{}", self.lock_table, partition)))
    }

    fn select_marker(&self, for_update: bool) -> String {
        format!(
            "SELECT revision FROM {} WHERE partition = $1 ORDER BY revision{}",
            quote_ident(&self.version_table),
            if for_update { " FOR UPDATE" } else { "" }
        )
    }

    fn read_marker(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        for_update: bool,
    ) -> Result<Vec<String>, MigrationError> {
        let rows = executor.query_all(
            &self.select_marker(for_update),
            &[Value::String(Some(partition.to_string()))],
        )?;
        let mut heads = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(token) = row.try_string(0)? {
                heads.push(token);
            }
        }
        Ok(heads)
    }
}

impl MarkerStore for TableMarkerStore {
    fn ensure(&self, executor: &dyn DbExecutor) -> Result<(), MigrationError> {
        for sql in self.bootstrap_statements() {
            executor.execute(&sql, &[])?;
        }
        Ok(())
    }

    fn current(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<String>, MigrationError> {
        self.read_marker(executor, partition, false)
    }

    fn current_for_update(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<String>, MigrationError> {
        self.read_marker(executor, partition, true)
    }

    fn write(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        heads: &[String],
    ) -> Result<(), MigrationError> {
        let table = quote_ident(&self.version_table);
        let partition = Value::String(Some(partition.to_string()));

        executor.execute(
            &format!("DELETE FROM {table} WHERE partition = $1"),
            &[partition.clone()],
        )?;
        for head in heads {
            executor.execute(
                &format!("INSERT INTO {table} (partition, revision) VALUES ($1, $2)"),
                &[partition.clone(), Value::String(Some(head.clone()))],
            )?;
        }
        Ok(())
    }

    fn record(
        &self,
        executor: &dyn DbExecutor,
        entry: &HistoryEntry,
    ) -> Result<(), MigrationError> {
        let sql = format!(
            "INSERT INTO {} (partition, revision, direction, checksum, applied_at, execution_time_ms) \
             VALUES ($1, $2, $3, $4, CAST(CAST($5 AS TEXT) AS TIMESTAMP), $6)",
            quote_ident(&self.history_table)
        );
        let applied_at = entry.applied_at.format("%Y-%m-%d %H:%M:%S%.f").to_string();

        executor.execute(
            &sql,
            &[
                Value::String(Some(entry.partition.clone())),
                Value::String(Some(entry.revision.clone())),
                Value::String(Some(entry.direction.as_str().to_string())),
                Value::String(Some(entry.checksum.clone())),
                Value::String(Some(applied_at)),
                Value::BigInt(entry.execution_time_ms),
            ],
        )?;
        Ok(())
    }

    fn history(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Vec<HistoryEntry>, MigrationError> {
        let sql = format!(
            "SELECT partition, revision, direction, checksum, applied_at::text, execution_time_ms \
             FROM {} WHERE partition = $1 ORDER BY id ASC",
            quote_ident(&self.history_table)
        );
        let rows = executor.query_all(&sql, &[Value::String(Some(partition.to_string()))])?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(HistoryEntry::from_row(row)?);
        }
        Ok(entries)
    }

    fn try_lock(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<bool, MigrationError> {
        let granted = executor
            .query_one(
                "SELECT pg_try_advisory_lock(hashtext($1))",
                &[self.lock_key(partition)],
            )?
            .try_bool(0)?
            .unwrap_or(false);
        if !granted {
            return Ok(false);
        }

        // A row left by a killed run is simply taken over
        let sql = format!(
            "INSERT INTO {} (partition, holder, acquired_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (partition) DO UPDATE \
             SET holder = EXCLUDED.holder, acquired_at = EXCLUDED.acquired_at",
            quote_ident(&self.lock_table)
        );
        executor.execute(
            &sql,
            &[
                Value::String(Some(partition.to_string())),
                Value::String(Some(holder.to_string())),
            ],
        )?;
        Ok(true)
    }

    fn unlock(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
        holder: &str,
    ) -> Result<(), MigrationError> {
        let sql = format!(
            "DELETE FROM {} WHERE partition = $1 AND holder = $2",
            quote_ident(&self.lock_table)
        );
        executor.execute(
            &sql,
            &[
                Value::String(Some(partition.to_string())),
                Value::String(Some(holder.to_string())),
            ],
        )?;
        executor.query_all(
            "SELECT pg_advisory_unlock(hashtext($1))",
            &[self.lock_key(partition)],
        )?;
        Ok(())
    }

    fn lock_holder(
        &self,
        executor: &dyn DbExecutor,
        partition: &str,
    ) -> Result<Option<String>, MigrationError> {
        let sql = format!(
            "SELECT holder FROM {} WHERE partition = $1",
            quote_ident(&self.lock_table)
        );
        let rows = executor.query_all(&sql, &[Value::String(Some(partition.to_string()))])?;
        match rows.first() {
            Some(row) => Ok(row.try_string(0)?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DbError, ScriptExecutor};
    use crate::migration::lock::RunLockGuard;
    use crate::migration::revision::Direction;
    use crate::row::Row;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[test]
    fn test_bootstrap_creates_three_tables() {
        let store = TableMarkerStore::default();
        let script = ScriptExecutor::new();
        store.ensure(&script).unwrap();

        let statements = script.statements();
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"revchain_version\""));
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS \"revchain_lock\""));
        assert!(statements[2].starts_with("CREATE TABLE IF NOT EXISTS \"revchain_history\""));
        assert!(statements[3].contains("idx_revchain_history_partition"));
    }

    #[test]
    fn test_write_replaces_marker_rows() {
        let store = TableMarkerStore::new("versions", "locks", "log");
        let script = ScriptExecutor::new();
        store
            .write(&script, "default", &["c3".to_string(), "x9".to_string()])
            .unwrap();

        assert_eq!(
            script.statements(),
            vec![
                "DELETE FROM \"versions\" WHERE partition = 'default'".to_string(),
                "INSERT INTO \"versions\" (partition, revision) VALUES ('default', 'c3')"
                    .to_string(),
                "INSERT INTO \"versions\" (partition, revision) VALUES ('default', 'x9')"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_locking_read_and_history_insert() {
        let store = TableMarkerStore::default();
        let script = ScriptExecutor::new();

        assert!(store.current_for_update(&script, "default").unwrap().is_empty());
        store
            .record(
                &script,
                &HistoryEntry::new("default", "a1", Direction::Downgrade, "00".into(), Some(3)),
            )
            .unwrap();

        let statements = script.statements();
        assert!(statements[0].ends_with("ORDER BY revision FOR UPDATE"));
        assert!(statements[1].contains("'downgrade'"));
        assert!(statements[1].ends_with(", 3)"));
    }

    /// Server side of the advisory-lock fake: locks belong to sessions, rows to the table
    #[derive(Default)]
    struct LockServer {
        advisory: RefCell<HashMap<String, u32>>,
        rows: RefCell<HashMap<String, String>>,
    }

    impl LockServer {
        /// Connection drop: PostgreSQL frees the session's advisory locks, rows stay
        fn kill(&self, session: u32) {
            self.advisory.borrow_mut().retain(|_, owner| *owner != session);
        }
    }

    struct Session<'s> {
        server: &'s LockServer,
        id: u32,
    }

    fn text(params: &[Value], i: usize) -> String {
        match &params[i] {
            Value::String(Some(s)) => s.clone(),
            other => panic!("expected text parameter, got {other:?}"),
        }
    }

    impl DbExecutor for Session<'_> {
        fn execute(&self, query: &str, params: &[Value]) -> Result<u64, DbError> {
            let mut rows = self.server.rows.borrow_mut();
            if query.starts_with("INSERT INTO \"revchain_lock\"") {
                rows.insert(text(params, 0), text(params, 1));
                Ok(1)
            } else if query.starts_with("DELETE FROM \"revchain_lock\"") {
                let (partition, holder) = (text(params, 0), text(params, 1));
                if rows.get(&partition) == Some(&holder) {
                    rows.remove(&partition);
                    return Ok(1);
                }
                Ok(0)
            } else {
                panic!("unexpected statement {query}")
            }
        }

        fn query_all(&self, query: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
            let value = if query.contains("pg_try_advisory_lock") {
                let mut advisory = self.server.advisory.borrow_mut();
                let owner = *advisory.entry(text(params, 0)).or_insert(self.id);
                Value::Bool(Some(owner == self.id))
            } else if query.contains("pg_advisory_unlock") {
                let mut advisory = self.server.advisory.borrow_mut();
                let key = text(params, 0);
                let released = advisory.get(&key) == Some(&self.id);
                if released {
                    advisory.remove(&key);
                }
                Value::Bool(Some(released))
            } else if query.starts_with("SELECT holder") {
                match self.server.rows.borrow().get(&text(params, 0)) {
                    Some(holder) => Value::String(Some(holder.clone())),
                    None => return Ok(Vec::new()),
                }
            } else {
                panic!("unexpected query {query}")
            };
            Ok(vec![Row::new(vec!["v".to_string()], vec![value])])
        }
    }

    #[test]
    fn test_lock_row_of_killed_run_does_not_block_next_run() {
        let store = TableMarkerStore::default();
        let server = LockServer::default();
        let crashed = Session { server: &server, id: 1 };
        let next = Session { server: &server, id: 2 };

        // the first run takes the lock, then its process dies without releasing
        let guard = RunLockGuard::acquire(&store, &crashed, "default", "pid-1-dead", 0).unwrap();
        std::mem::forget(guard);

        let err = RunLockGuard::acquire(&store, &next, "default", "pid-2-live", 0)
            .err()
            .unwrap();
        assert!(matches!(err, MigrationError::LockTimeout(ref msg) if msg.contains("pid-1-dead")));

        server.kill(1);
        assert_eq!(
            store.lock_holder(&next, "default").unwrap().as_deref(),
            Some("pid-1-dead")
        );

        {
            let _guard =
                RunLockGuard::acquire(&store, &next, "default", "pid-2-live", 0).unwrap();
            assert_eq!(
                store.lock_holder(&next, "default").unwrap().as_deref(),
                Some("pid-2-live")
            );
        }
        assert!(store.lock_holder(&next, "default").unwrap().is_none());
        assert!(server.advisory.borrow().is_empty());
    }

    #[test]
    fn test_lock_is_keyed_by_table_and_partition() {
        let store = TableMarkerStore::new("versions", "locks", "log");
        let script = ScriptExecutor::new();
        // no row comes back from the script executor, so nothing is granted
        assert!(store.try_lock(&script, "notifications", "run-1").is_err());
        assert_eq!(
            script.statements(),
            vec!["SELECT pg_try_advisory_lock(hashtext('locks:notifications'))".to_string()]
        );
    }
}
