//! SchemaManager - what a revision's transforms receive
//!
//! Wraps the step's executor (normally the step transaction) together with the partition being
//! migrated, and offers DDL helpers built with `sea-query`, introspection over
//! `information_schema`, and row backfills.

use crate::executor::{DbError, DbExecutor};
use crate::migration::backfill::Backfill;
use crate::row::Row;
use sea_query::{
    ColumnDef, IndexCreateStatement, IndexDropStatement, PostgresQueryBuilder, Table,
    TableAlterStatement, TableCreateStatement, TableDropStatement, Value,
};

const DEFAULT_BATCH_SIZE: usize = 500;

/// Column as reported by `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

pub struct SchemaManager<'a> {
    executor: &'a dyn DbExecutor,
    partition: &'a str,
    batch_size: usize,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn DbExecutor, partition: &'a str) -> Self {
        Self {
            executor,
            partition,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Page size used by [`SchemaManager::backfill`]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Partition this manager migrates
    pub fn partition(&self) -> &str {
        self.partition
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get a reference to the underlying executor
    pub fn executor(&self) -> &dyn DbExecutor {
        self.executor
    }

    /// Create a table
    ///
    /// ```rust,no_run
    /// # use revchain::migration::SchemaManager;
    /// # fn f(manager: &SchemaManager<'_>) -> Result<(), revchain::DbError> {
    /// use sea_query::{ColumnDef, Table};
    ///
    /// let table = Table::create()
    ///     .table("speaker")
    ///     .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
    ///     .col(ColumnDef::new("bio").text().null())
    ///     .to_owned();
    /// manager.create_table(table)
    /// # }
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), DbError> {
        self.run(&table.build(PostgresQueryBuilder))
    }

    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), DbError> {
        self.run(&table.build(PostgresQueryBuilder))
    }

    pub fn alter_table(&self, alter: TableAlterStatement) -> Result<(), DbError> {
        self.run(&alter.build(PostgresQueryBuilder))
    }

    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), DbError> {
        self.run(&index.build(PostgresQueryBuilder))
    }

    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), DbError> {
        self.run(&index.build(PostgresQueryBuilder))
    }

    /// Add a column to an existing table
    pub fn add_column(&self, table: &str, column: ColumnDef) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .add_column(column)
            .to_owned();
        self.alter_table(alter)
    }

    /// Drop a column from an existing table
    pub fn drop_column(&self, table: &str, column: &str) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .drop_column(column.to_string())
            .to_owned();
        self.alter_table(alter)
    }

    /// Rename a column in an existing table
    pub fn rename_column(&self, table: &str, old_name: &str, new_name: &str) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .rename_column(old_name.to_string(), new_name.to_string())
            .to_owned();
        self.alter_table(alter)
    }

    /// Execute raw SQL
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        self.executor.execute(sql, params).map(|_| ())
    }

    /// Run a query and return all rows
    pub fn query_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.executor.query_all(sql, params)
    }

    /// Whether `table` exists in the current schema
    pub fn has_table(&self, table: &str) -> Result<bool, DbError> {
        let rows = self.executor.query_all(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            &[Value::String(Some(table.to_string()))],
        )?;
        Ok(!rows.is_empty())
    }

    /// Whether `table` has a column called `column`
    pub fn has_column(&self, table: &str, column: &str) -> Result<bool, DbError> {
        Ok(self.columns(table)?.iter().any(|c| c.name == column))
    }

    /// Columns of `table` in ordinal order
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
        let rows = self.executor.query_all(
            "SELECT column_name::text, data_type::text, is_nullable::text \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[Value::String(Some(table.to_string()))],
        )?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_string(0)?.unwrap_or_default(),
                    data_type: row.try_string(1)?.unwrap_or_default(),
                    nullable: row.try_string(2)?.as_deref() == Some("YES"),
                })
            })
            .collect()
    }

    /// Start a backfill that writes `target_column` for every row of `table`
    ///
    /// Rows are visited in `key_column` order, one page at a time, and each row gets its own
    /// single-row `UPDATE`. The work runs on this manager's executor, so it is part of the
    /// revision's transaction.
    pub fn backfill(&self, table: &str, key_column: &str, target_column: &str) -> Backfill<'_> {
        Backfill::new(self, table, key_column, target_column)
    }

    fn run(&self, sql: &str) -> Result<(), DbError> {
        log::debug!("[{}] {}", self.partition, sql);
        self.executor.execute(sql, &[]).map(|_| ())
    }
}

/// Quote an identifier for PostgreSQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
