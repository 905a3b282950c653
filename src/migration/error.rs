//! Migration-specific error types
//!
//! Three families, in the order a run can hit them:
//! graph integrity (the chain itself is malformed; raised before any transform runs),
//! preconditions (the request or the persisted state doesn't fit the chain),
//! and execution (a transform or its bookkeeping failed inside a step).

use crate::executor::DbError;
use crate::migration::revision::Direction;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Database error outside a revision step (bootstrap, marker reads, lock table)
    Database(DbError),

    /// A revision names a predecessor that is not in the known set
    ChainBroken { revision: String, missing: String },
    /// Predecessor links loop back on themselves
    Cycle { revisions: Vec<String> },
    /// More than one revision has no predecessor
    MultipleRoots { roots: Vec<String> },
    /// Two revisions share a token
    DuplicateRevision(String),
    /// More than one revision has no successor; heads must be merged first
    AmbiguousHead { heads: Vec<String> },

    /// Target or marker names a revision that is not in the chain
    UnknownRevision(String),
    /// A token prefix matches several revisions
    AmbiguousRevision { prefix: String, candidates: Vec<String> },
    /// Target is unreachable in the requested direction
    InvalidTarget(String),
    /// The applied-revision marker moved while this run was using it
    MarkerChanged {
        partition: String,
        expected: Vec<String>,
        found: Vec<String>,
        /// Revisions committed earlier in the same run
        completed: Vec<String>,
    },
    /// Another run holds the partition's lock
    LockTimeout(String),
    /// A revision changed after it was applied
    ChecksumMismatch {
        revision: String,
        stored: String,
        current: String,
    },

    /// A transform (or its step bookkeeping) failed; the step was rolled back
    ExecutionFailed {
        revision: String,
        direction: Direction,
        partition: String,
        error: String,
        /// Revisions committed earlier in the same run
        completed: Vec<String>,
    },
}

impl MigrationError {
    /// Graph-integrity errors are raised before any transform runs
    pub fn is_graph_integrity(&self) -> bool {
        matches!(
            self,
            MigrationError::ChainBroken { .. }
                | MigrationError::Cycle { .. }
                | MigrationError::MultipleRoots { .. }
                | MigrationError::DuplicateRevision(_)
                | MigrationError::AmbiguousHead { .. }
        )
    }

    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            MigrationError::UnknownRevision(_)
                | MigrationError::AmbiguousRevision { .. }
                | MigrationError::InvalidTarget(_)
                | MigrationError::MarkerChanged { .. }
                | MigrationError::LockTimeout(_)
                | MigrationError::ChecksumMismatch { .. }
        )
    }
}

fn tokens(list: &[String]) -> String {
    if list.is_empty() {
        "<none>".to_string()
    } else {
        list.join(", ")
    }
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {e}"),
            MigrationError::ChainBroken { revision, missing } => write!(
                f,
                "Revision chain is broken: '{revision}' revises '{missing}', which is not a known revision"
            ),
            MigrationError::Cycle { revisions } => write!(
                f,
                "Revision chain contains a cycle through: {}",
                tokens(revisions)
            ),
            MigrationError::MultipleRoots { roots } => write!(
                f,
                "Revision chain has more than one root: {}",
                tokens(roots)
            ),
            MigrationError::DuplicateRevision(id) => {
                write!(f, "Revision '{id}' is defined more than once")
            }
            MigrationError::AmbiguousHead { heads } => write!(
                f,
                "Multiple head revisions are present: {}\n\
                 Author a merge revision that revises all of them before migrating.",
                tokens(heads)
            ),
            MigrationError::UnknownRevision(id) => write!(f, "Unknown revision '{id}'"),
            MigrationError::AmbiguousRevision { prefix, candidates } => write!(
                f,
                "Revision prefix '{prefix}' is ambiguous: {}",
                tokens(candidates)
            ),
            MigrationError::InvalidTarget(msg) => write!(f, "Invalid migration target: {msg}"),
            MigrationError::MarkerChanged {
                partition,
                expected,
                found,
                completed,
            } => {
                write!(
                    f,
                    "Applied revision for partition '{partition}' changed during the run \
                     (expected {}, found {}). Another migration may be running.",
                    tokens(expected),
                    tokens(found)
                )?;
                if !completed.is_empty() {
                    write!(f, "\nCommitted before the change: {}", tokens(completed))?;
                }
                Ok(())
            }
            MigrationError::LockTimeout(msg) => write!(
                f,
                "Migration lock timeout: {msg}\n\
                 Another process may be running migrations. If this persists, check for a \
                 migration process that is still connected."
            ),
            MigrationError::ChecksumMismatch {
                revision,
                stored,
                current,
            } => write!(
                f,
                "Revision '{revision}' has been modified after being applied.\n\
                 Stored checksum: {stored}\n\
                 Current checksum: {current}"
            ),
            MigrationError::ExecutionFailed {
                revision,
                direction,
                partition,
                error,
                completed,
            } => write!(
                f,
                "{direction} of revision '{revision}' on partition '{partition}' failed: {error}\n\
                 Committed before the failure: {}",
                tokens(completed)
            ),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}
