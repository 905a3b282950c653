//! Revision: rename event name to title
//! Revises: 5c0d9e8f7a6b
//! Generated: 2024-04-02 10:21:09 UTC

use revchain::migration::Revision;

pub const REVISION: &str = "6d1e2f3a4b5c";
pub const DOWN_REVISION: &str = "5c0d9e8f7a6b";

pub fn revision() -> Revision {
    Revision::new(REVISION, "rename event name to title")
        .revises(DOWN_REVISION)
        .upgrade(|manager| manager.rename_column("event", "name", "title"))
        .downgrade(|manager| manager.rename_column("event", "title", "name"))
}
