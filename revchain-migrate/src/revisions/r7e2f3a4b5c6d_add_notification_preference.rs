//! Revision: add notification preference
//! Revises: 6d1e2f3a4b5c
//! Generated: 2024-05-14 17:08:52 UTC
//!
//! Lives on the `notifications` partition only; the default database just records it.

use revchain::migration::Revision;
use sea_query::{ColumnDef, Table};

pub const REVISION: &str = "7e2f3a4b5c6d";
pub const DOWN_REVISION: &str = "6d1e2f3a4b5c";

pub const PARTITION: &str = "notifications";

pub fn revision() -> Revision {
    Revision::new(REVISION, "add notification preference")
        .revises(DOWN_REVISION)
        .upgrade_for(PARTITION, |manager| {
            manager.create_table(
                Table::create()
                    .table("notification_preference")
                    .if_not_exists()
                    .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new("user_id").integer().not_null())
                    .col(ColumnDef::new("channel").string_len(32).not_null())
                    .col(ColumnDef::new("enabled").boolean().not_null().default(true))
                    .to_owned(),
            )
        })
        .downgrade_for(PARTITION, |manager| {
            manager.drop_table(
                Table::drop()
                    .table("notification_preference")
                    .if_exists()
                    .to_owned(),
            )
        })
}
