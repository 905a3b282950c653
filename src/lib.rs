//! # revchain
//!
//! Revision-chain schema migrations for PostgreSQL over `may_postgres`.
//!
//! Revisions form a graph through their predecessor tokens. The [`migration`] module validates
//! that graph, resolves the path between the applied state of a partition and a target, and
//! applies it one transaction per revision, with per-partition dispatch and row backfills.

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod row;
pub mod transaction;

#[cfg(test)]
mod test_helpers;

pub use config::{MigrateConfig, DEFAULT_PARTITION};
pub use connection::{connect, ConnectionError};
pub use executor::{DbError, DbExecutor, PgExecutor, ScriptExecutor};
pub use migration::MigrationError;
pub use row::Row;
pub use transaction::{Transaction, TransactionError};
