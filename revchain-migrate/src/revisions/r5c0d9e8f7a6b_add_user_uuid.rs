//! Revision: add user uuid
//! Revises: 4b8e1d2c3f7a
//! Generated: 2024-03-19 14:55:38 UTC
//!
//! Adds a nullable column, fills every existing row with a fresh UUID in pages, then makes
//! the column mandatory and unique.

use revchain::migration::{fresh_uuid, Revision};
use sea_query::{ColumnDef, Expr, Index};

pub const REVISION: &str = "5c0d9e8f7a6b";
pub const DOWN_REVISION: &str = "4b8e1d2c3f7a";

pub fn revision() -> Revision {
    Revision::new(REVISION, "add user uuid")
        .revises(DOWN_REVISION)
        .upgrade(|manager| {
            manager.add_column("user", ColumnDef::new("uuid").uuid().null().to_owned())?;

            let filled = manager
                .backfill("user", "id", "uuid")
                .only_nulls()
                .cast_as("uuid")
                .on_progress(|p| log::info!("{}: {} rows backfilled", p.table, p.rows_done))
                .run(fresh_uuid)?;
            log::info!("Assigned uuid to {filled} user rows");

            manager.execute(r#"ALTER TABLE "user" ALTER COLUMN uuid SET NOT NULL"#, &[])?;
            manager.create_index(
                Index::create()
                    .name("uq_user_uuid")
                    .table("user")
                    .col(Expr::col("uuid"))
                    .unique()
                    .to_owned(),
            )
        })
        .downgrade(|manager| {
            manager.drop_index(Index::drop().name("uq_user_uuid").if_exists().to_owned())?;
            manager.drop_column("user", "uuid")
        })
}
