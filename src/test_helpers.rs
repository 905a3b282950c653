//! Test doubles shared by unit tests

use crate::executor::{DbError, DbExecutor};
use crate::migration::Revision;
use crate::row::Row;
use sea_query::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

pub(crate) type Shape = BTreeMap<String, BTreeSet<String>>;

/// Executor that models a schema as tables and column names
///
/// Understands a tiny statement language: `CREATE TABLE t`, `DROP TABLE t`,
/// `ALTER TABLE t ADD c`, `ALTER TABLE t DROP c` and `FAIL <reason>`, plus
/// `BEGIN`/`COMMIT`/`ROLLBACK` with snapshot semantics.
#[derive(Debug, Default)]
pub(crate) struct ModelSchema {
    tables: RefCell<Shape>,
    snapshot: RefCell<Option<Shape>>,
    log: RefCell<Vec<String>>,
}

impl ModelSchema {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shape(&self) -> Shape {
        self.tables.borrow().clone()
    }

    /// Statements other than transaction control
    pub(crate) fn ddl(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|s| !matches!(s.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn apply(&self, words: &[&str]) -> Result<(), DbError> {
        let mut tables = self.tables.borrow_mut();
        match words {
            ["CREATE", "TABLE", t] => {
                if tables.insert(t.to_string(), BTreeSet::new()).is_some() {
                    return Err(DbError::QueryError(format!("relation \"{t}\" already exists")));
                }
            }
            ["DROP", "TABLE", t] => {
                tables
                    .remove(*t)
                    .ok_or_else(|| DbError::QueryError(format!("table \"{t}\" does not exist")))?;
            }
            ["ALTER", "TABLE", t, "ADD", c] => {
                let columns = tables
                    .get_mut(*t)
                    .ok_or_else(|| DbError::QueryError(format!("table \"{t}\" does not exist")))?;
                columns.insert(c.to_string());
            }
            ["ALTER", "TABLE", t, "DROP", c] => {
                let columns = tables
                    .get_mut(*t)
                    .ok_or_else(|| DbError::QueryError(format!("table \"{t}\" does not exist")))?;
                if !columns.remove(*c) {
                    return Err(DbError::QueryError(format!("column \"{c}\" does not exist")));
                }
            }
            ["FAIL", reason @ ..] => return Err(DbError::Other(reason.join(" "))),
            _ => return Err(DbError::QueryError(format!("unsupported: {}", words.join(" ")))),
        }
        Ok(())
    }
}

impl DbExecutor for ModelSchema {
    fn execute(&self, query: &str, _params: &[Value]) -> Result<u64, DbError> {
        self.log.borrow_mut().push(query.to_string());
        let words: Vec<&str> = query.split_whitespace().collect();
        match words.as_slice() {
            ["BEGIN"] => {
                *self.snapshot.borrow_mut() = Some(self.shape());
            }
            ["COMMIT"] => {
                self.snapshot.borrow_mut().take();
            }
            ["ROLLBACK"] => {
                if let Some(shape) = self.snapshot.borrow_mut().take() {
                    *self.tables.borrow_mut() = shape;
                }
            }
            other => self.apply(other)?,
        }
        Ok(1)
    }

    fn query_all(&self, _query: &str, _params: &[Value]) -> Result<Vec<Row>, DbError> {
        Ok(Vec::new())
    }
}

/// Revision whose transforms create and drop a table named after it
pub(crate) fn table_revision(id: &str, parents: &[&str]) -> Revision {
    let create = format!("CREATE TABLE t_{id}");
    let drop = format!("DROP TABLE t_{id}");
    parents
        .iter()
        .fold(Revision::new(id, format!("create t_{id}")), |r, p| r.revises(*p))
        .upgrade(move |m| m.execute(&create, &[]))
        .downgrade(move |m| m.execute(&drop, &[]))
}
