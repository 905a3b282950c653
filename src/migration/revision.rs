//! Revision definition
//!
//! A revision is an immutable node in the chain: a unique token, zero or more predecessor
//! tokens (none for the root, one normally, several at a merge point), a message, and a set of
//! forward/backward transforms keyed by partition name.
//!
//! Partition dispatch is a plain name lookup. A partition with no registered handler gets the
//! explicit default, a no-op, so a revision that only touches the `notifications` bind simply
//! does nothing when the `default` partition is migrated.

use crate::config::DEFAULT_PARTITION;
use crate::executor::DbError;
use crate::migration::schema_manager::SchemaManager;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A forward or backward transform
pub type Transform = Arc<dyn Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync>;

/// Direction for migration execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply the revision
    Upgrade,
    /// Roll the revision back
    Downgrade,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => write!(f, "Upgrade"),
            Direction::Downgrade => write!(f, "Downgrade"),
        }
    }
}

#[derive(Clone, Default)]
struct Handlers {
    upgrade: Option<Transform>,
    downgrade: Option<Transform>,
}

/// One versioned schema change
///
/// # Example
///
/// ```rust
/// use revchain::migration::Revision;
/// use sea_query::{ColumnDef, Table};
///
/// pub const REVISION: &str = "4f2c9a1b7d30";
/// pub const DOWN_REVISION: &str = "a91e03c5d2f8";
///
/// pub fn revision() -> Revision {
///     Revision::new(REVISION, "add venue to event")
///         .revises(DOWN_REVISION)
///         .upgrade(|m| {
///             m.add_column("event", ColumnDef::new("venue").string().null().to_owned())
///         })
///         .downgrade(|m| m.drop_column("event", "venue"))
/// }
/// ```
#[derive(Clone)]
pub struct Revision {
    id: String,
    down_revisions: Vec<String>,
    message: String,
    handlers: BTreeMap<String, Handlers>,
}

impl Revision {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            down_revisions: Vec::new(),
            message: message.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Add a predecessor
    #[must_use]
    pub fn revises(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        if !self.down_revisions.contains(&parent) {
            self.down_revisions.push(parent);
        }
        self
    }

    /// Declare a merge point over several predecessors
    #[must_use]
    pub fn merges<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for parent in parents {
            self = self.revises(parent);
        }
        self
    }

    /// Forward transform for the default partition
    #[must_use]
    pub fn upgrade<F>(self, f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.upgrade_for(DEFAULT_PARTITION, f)
    }

    /// Backward transform for the default partition
    #[must_use]
    pub fn downgrade<F>(self, f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.downgrade_for(DEFAULT_PARTITION, f)
    }

    /// Forward transform for a named partition
    #[must_use]
    pub fn upgrade_for<F>(mut self, partition: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.handlers.entry(partition.into()).or_default().upgrade = Some(Arc::new(f));
        self
    }

    /// Backward transform for a named partition
    #[must_use]
    pub fn downgrade_for<F>(mut self, partition: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.handlers.entry(partition.into()).or_default().downgrade = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn down_revisions(&self) -> &[String] {
        &self.down_revisions
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_root(&self) -> bool {
        self.down_revisions.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.down_revisions.len() > 1
    }

    /// Partitions this revision has at least one handler for
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Whether a handler exists for `partition` in `direction`
    pub fn handles(&self, partition: &str, direction: Direction) -> bool {
        self.transform(partition, direction).is_some()
    }

    fn transform(&self, partition: &str, direction: Direction) -> Option<&Transform> {
        let handlers = self.handlers.get(partition)?;
        match direction {
            Direction::Upgrade => handlers.upgrade.as_ref(),
            Direction::Downgrade => handlers.downgrade.as_ref(),
        }
    }

    /// Run the transform for the manager's partition
    ///
    /// Returns `Ok(false)` when the partition has no handler and the default no-op was used.
    pub fn run(&self, direction: Direction, manager: &SchemaManager<'_>) -> Result<bool, DbError> {
        match self.transform(manager.partition(), direction) {
            Some(transform) => {
                transform(manager)?;
                Ok(true)
            }
            None => {
                log::debug!(
                    "Revision {} has no {} handler for partition '{}'; nothing to do",
                    self.id,
                    direction.as_str(),
                    manager.partition()
                );
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id)
            .field("down_revisions", &self.down_revisions)
            .field("message", &self.message)
            .field("partitions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
