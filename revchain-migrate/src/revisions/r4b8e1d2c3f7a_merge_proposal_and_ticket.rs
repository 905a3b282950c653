//! Revision: merge proposal and ticket heads
//! Revises: 27a6b0f3c0d1, 3a9f2c4d5e60
//! Generated: 2024-02-06 08:30:11 UTC

use revchain::migration::Revision;

pub const REVISION: &str = "4b8e1d2c3f7a";
pub const DOWN_REVISIONS: [&str; 2] = ["27a6b0f3c0d1", "3a9f2c4d5e60"];

pub fn revision() -> Revision {
    Revision::new(REVISION, "merge proposal and ticket heads").merges(DOWN_REVISIONS)
}
