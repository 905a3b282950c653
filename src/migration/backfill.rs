//! Row backfills run inside a revision step.
//!
//! A backfill visits every existing row of a table through a lazy, keyset-paginated
//! [`BackfillBatch`] and issues one single-row `UPDATE` per row with a computed value. It runs
//! on the step's executor, so it commits or rolls back together with the surrounding DDL.
//!
//! A failed backfill is retried by re-running the step; it does not resume mid-table. Using
//! [`Backfill::only_nulls`] makes such a retry skip rows that already have a value.

use crate::executor::DbError;
use crate::migration::schema_manager::{quote_ident, SchemaManager};
use crate::row::Row;
use sea_query::Value;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Advisory progress report, emitted after each page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillProgress {
    pub table: String,
    pub rows_done: u64,
    pub batches: u64,
}

pub type ProgressCallback = Box<dyn Fn(&BackfillProgress) + Send + Sync>;

/// Value generator that assigns a fresh random UUID to every row
pub fn fresh_uuid(_row: &Row) -> Result<Value, DbError> {
    Ok(Value::String(Some(uuid::Uuid::new_v4().to_string())))
}

pub struct Backfill<'m> {
    manager: &'m SchemaManager<'m>,
    table: String,
    key_column: String,
    target_column: String,
    batch_size: usize,
    only_nulls: bool,
    cast: Option<String>,
    progress: Option<ProgressCallback>,
}

impl<'m> Backfill<'m> {
    pub(crate) fn new(
        manager: &'m SchemaManager<'m>,
        table: &str,
        key_column: &str,
        target_column: &str,
    ) -> Self {
        Self {
            manager,
            table: table.to_string(),
            key_column: key_column.to_string(),
            target_column: target_column.to_string(),
            batch_size: manager.batch_size(),
            only_nulls: false,
            cast: None,
            progress: None,
        }
    }

    /// Only visit rows whose target column is still NULL
    #[must_use]
    pub fn only_nulls(mut self) -> Self {
        self.only_nulls = true;
        self
    }

    /// Cast the (text) value to `sql_type` in the UPDATE, e.g. `uuid`
    #[must_use]
    pub fn cast_as(mut self, sql_type: &str) -> Self {
        self.cast = Some(sql_type.to_string());
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BackfillProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Lazy sequence over the rows to visit
    ///
    /// Each row carries the key column at index 0 and the target column at index 1.
    pub fn rows(&self) -> BackfillBatch<'_, 'm> {
        BackfillBatch {
            backfill: self,
            page: Vec::new().into_iter(),
            last_key: None,
            exhausted: false,
            batches: 0,
        }
    }

    /// Compute and write a value for every row; returns the number of rows updated
    ///
    /// # Errors
    ///
    /// Stops at the first failing read, computation or update. An update that does not touch
    /// exactly one row is an error.
    pub fn run<F>(self, mut compute: F) -> Result<u64, DbError>
    where
        F: FnMut(&Row) -> Result<Value, DbError>,
    {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::backfill_span(&self.table, &self.target_column).entered();

        let update = self.update_sql();
        let executor = self.manager.executor();
        let mut updated = 0u64;
        let mut rows = self.rows();

        while let Some(row) = rows.next() {
            let row = row?;
            let key = row
                .get(0)
                .cloned()
                .ok_or_else(|| DbError::ParseError("backfill row has no key column".into()))?;
            let value = compute(&row)?;

            let affected = executor.execute(&update, &[value, key.clone()])?;
            if affected != 1 {
                return Err(DbError::QueryError(format!(
                    "backfill of {}.{} for key {:?} updated {} rows",
                    self.table, self.target_column, key, affected
                )));
            }
            updated += 1;

            if rows.at_page_end() {
                self.report(updated, rows.batches);
            }
        }

        log::info!(
            "[{}] Backfilled {}.{}: {} row(s)",
            self.manager.partition(),
            self.table,
            self.target_column,
            updated
        );

        #[cfg(feature = "metrics")]
        METRICS.record_backfill_rows(&self.table, updated);

        Ok(updated)
    }

    fn report(&self, rows_done: u64, batches: u64) {
        log::debug!(
            "[{}] backfill {}.{}: {} row(s) in {} batch(es)",
            self.manager.partition(),
            self.table,
            self.target_column,
            rows_done,
            batches
        );
        if let Some(callback) = &self.progress {
            callback(&BackfillProgress {
                table: self.table.clone(),
                rows_done,
                batches,
            });
        }
    }

    fn select_sql(&self, after_key: bool) -> String {
        let key = quote_ident(&self.key_column);
        let target = quote_ident(&self.target_column);
        let mut conditions = Vec::new();
        if after_key {
            conditions.push(format!("{key} > $1"));
        }
        if self.only_nulls {
            conditions.push(format!("{target} IS NULL"));
        }
        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        format!(
            "SELECT {key}, {target} FROM {}{filter} ORDER BY {key} LIMIT {}",
            quote_ident(&self.table),
            self.batch_size
        )
    }

    fn update_sql(&self) -> String {
        let value = match &self.cast {
            Some(ty) => format!("CAST(CAST($1 AS TEXT) AS {ty})"),
            None => "$1".to_string(),
        };
        format!(
            "UPDATE {} SET {} = {value} WHERE {} = $2",
            quote_ident(&self.table),
            quote_ident(&self.target_column),
            quote_ident(&self.key_column)
        )
    }
}

/// Lazily fetched rows of a backfill, one page per query
pub struct BackfillBatch<'b, 'm> {
    backfill: &'b Backfill<'m>,
    page: std::vec::IntoIter<Row>,
    last_key: Option<Value>,
    exhausted: bool,
    batches: u64,
}

impl BackfillBatch<'_, '_> {
    /// Pages fetched so far
    pub fn batches(&self) -> u64 {
        self.batches
    }

    fn at_page_end(&self) -> bool {
        self.page.len() == 0
    }

    fn fetch_page(&mut self) -> Result<(), DbError> {
        let executor = self.backfill.manager.executor();
        let rows = match &self.last_key {
            Some(key) => executor.query_all(&self.backfill.select_sql(true), &[key.clone()])?,
            None => executor.query_all(&self.backfill.select_sql(false), &[])?,
        };
        if rows.len() < self.backfill.batch_size {
            self.exhausted = true;
        }
        if !rows.is_empty() {
            self.batches += 1;
        }
        self.page = rows.into_iter();
        Ok(())
    }
}

impl Iterator for BackfillBatch<'_, '_> {
    type Item = Result<Row, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.len() == 0 {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let row = self.page.next()?;
        self.last_key = row.get(0).cloned();
        Some(Ok(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DbExecutor;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// One-table fake: serves the backfill's keyset SELECTs and applies its UPDATEs
    struct UserTable {
        rows: RefCell<Vec<(i64, Option<String>)>>,
        selects: RefCell<u32>,
        updates: RefCell<u32>,
    }

    impl UserTable {
        fn with_rows(n: i64) -> Self {
            Self {
                rows: RefCell::new((1..=n).map(|id| (id, None)).collect()),
                selects: RefCell::new(0),
                updates: RefCell::new(0),
            }
        }

        fn limit(query: &str) -> usize {
            query
                .rsplit("LIMIT ")
                .next()
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(usize::MAX)
        }
    }

    impl DbExecutor for UserTable {
        fn execute(&self, query: &str, params: &[Value]) -> Result<u64, DbError> {
            assert!(query.starts_with("UPDATE \"user\" SET \"uuid\""), "{query}");
            *self.updates.borrow_mut() += 1;
            let Value::BigInt(Some(key)) = params[1] else {
                panic!("unexpected key {:?}", params[1]);
            };
            let Value::String(Some(ref value)) = params[0] else {
                panic!("unexpected value {:?}", params[0]);
            };
            let mut rows = self.rows.borrow_mut();
            let row = rows.iter_mut().find(|(id, _)| *id == key);
            Ok(row.map_or(0, |r| {
                r.1 = Some(value.clone());
                1
            }))
        }

        fn query_all(&self, query: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
            *self.selects.borrow_mut() += 1;
            let after = match params.first() {
                Some(Value::BigInt(Some(k))) => *k,
                _ => i64::MIN,
            };
            let only_nulls = query.contains("IS NULL");
            Ok(self
                .rows
                .borrow()
                .iter()
                .filter(|(id, v)| *id > after && (!only_nulls || v.is_none()))
                .take(Self::limit(query))
                .map(|(id, v)| {
                    Row::new(
                        vec!["id".into(), "uuid".into()],
                        vec![Value::BigInt(Some(*id)), Value::String(v.clone())],
                    )
                })
                .collect())
        }
    }

    #[test]
    fn test_backfill_updates_every_row_with_unique_values() {
        let table = UserTable::with_rows(23);
        let manager = SchemaManager::new(&table, "default").with_batch_size(5);

        let updated = manager
            .backfill("user", "id", "uuid")
            .run(fresh_uuid)
            .unwrap();

        assert_eq!(updated, 23);
        assert_eq!(*table.updates.borrow(), 23);

        let rows = table.rows.borrow();
        assert!(rows.iter().all(|(_, v)| v.is_some()), "no nulls left");
        let distinct: HashSet<_> = rows.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(distinct.len(), 23);
        // 5 full pages of 5 would be 25 rows; 23 rows -> 4 full pages + 1 short page
        assert_eq!(*table.selects.borrow(), 5);
    }

    #[test]
    fn test_backfill_over_empty_table_does_nothing() {
        let table = UserTable::with_rows(0);
        let manager = SchemaManager::new(&table, "default");
        let updated = manager.backfill("user", "id", "uuid").run(fresh_uuid).unwrap();
        assert_eq!(updated, 0);
        assert_eq!(*table.selects.borrow(), 1);
    }

    #[test]
    fn test_only_nulls_skips_filled_rows() {
        let table = UserTable::with_rows(6);
        table.rows.borrow_mut()[0].1 = Some("kept".into());
        table.rows.borrow_mut()[3].1 = Some("kept".into());

        let manager = SchemaManager::new(&table, "default").with_batch_size(2);
        let updated = manager
            .backfill("user", "id", "uuid")
            .only_nulls()
            .run(fresh_uuid)
            .unwrap();

        assert_eq!(updated, 4);
        assert_eq!(table.rows.borrow()[0].1.as_deref(), Some("kept"));
    }

    #[test]
    fn test_rows_are_fetched_lazily() {
        let table = UserTable::with_rows(10);
        let manager = SchemaManager::new(&table, "default").with_batch_size(3);
        let backfill = manager.backfill("user", "id", "uuid");

        let mut rows = backfill.rows();
        assert_eq!(*table.selects.borrow(), 0);
        rows.next().unwrap().unwrap();
        assert_eq!(*table.selects.borrow(), 1);
        assert_eq!(rows.by_ref().count(), 9);
        assert_eq!(rows.batches(), 4);
    }

    #[test]
    fn test_progress_is_reported_per_page() {
        let table = UserTable::with_rows(7);
        let manager = SchemaManager::new(&table, "default").with_batch_size(3);
        let seen = Arc::new(AtomicU64::new(0));
        let last = Arc::clone(&seen);

        manager
            .backfill("user", "id", "uuid")
            .on_progress(move |p| last.store(p.rows_done, Ordering::SeqCst))
            .run(fresh_uuid)
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_compute_error_stops_the_backfill() {
        let table = UserTable::with_rows(4);
        let manager = SchemaManager::new(&table, "default");
        let mut calls = 0;
        let err = manager
            .backfill("user", "id", "uuid")
            .run(|_| {
                calls += 1;
                if calls == 3 {
                    Err(DbError::Other("constraint".into()))
                } else {
                    fresh_uuid(&Row::new(vec![], vec![]))
                }
            })
            .unwrap_err();
        assert!(err.to_string().contains("constraint"));
        assert_eq!(*table.updates.borrow(), 2);
    }

    #[test]
    fn test_sql_shapes() {
        let table = UserTable::with_rows(0);
        let manager = SchemaManager::new(&table, "default").with_batch_size(10);
        let backfill = manager.backfill("user", "id", "uuid").only_nulls().cast_as("uuid");
        assert_eq!(
            backfill.select_sql(true),
            "SELECT \"id\", \"uuid\" FROM \"user\" WHERE \"id\" > $1 AND \"uuid\" IS NULL ORDER BY \"id\" LIMIT 10"
        );
        assert_eq!(
            backfill.update_sql(),
            "UPDATE \"user\" SET \"uuid\" = CAST(CAST($1 AS TEXT) AS uuid) WHERE \"id\" = $2"
        );
    }
}
