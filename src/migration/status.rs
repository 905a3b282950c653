//! Migration status for one partition

/// A revision as listed by status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSummary {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub partition: String,
    /// Marker tokens
    pub current: Vec<String>,
    /// Applied revisions, root first
    pub applied: Vec<RevisionSummary>,
    /// Revisions between the current state and head, in the order an upgrade would run them
    pub pending: Vec<RevisionSummary>,
}

impl MigrationStatus {
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Nothing applied yet
    #[must_use]
    pub fn is_base(&self) -> bool {
        self.current.is_empty()
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(|r| r.id.as_str())
    }
}
