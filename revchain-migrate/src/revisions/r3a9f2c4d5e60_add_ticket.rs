//! Revision: add ticket
//! Revises: 1975ea83b712
//! Generated: 2024-02-05 11:02:47 UTC

use revchain::migration::Revision;
use sea_query::{ColumnDef, Table};

pub const REVISION: &str = "3a9f2c4d5e60";
pub const DOWN_REVISION: &str = "1975ea83b712";

pub fn revision() -> Revision {
    Revision::new(REVISION, "add ticket")
        .revises(DOWN_REVISION)
        .upgrade(|manager| {
            manager.create_table(
                Table::create()
                    .table("ticket")
                    .if_not_exists()
                    .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new("event_id").integer().not_null())
                    .col(ColumnDef::new("name").string_len(255).not_null())
                    .col(ColumnDef::new("price_cents").big_integer().not_null().default(0))
                    .col(ColumnDef::new("quantity").integer().null())
                    .to_owned(),
            )?;

            manager.execute(
                "ALTER TABLE ticket ADD CONSTRAINT fk_ticket_event \
                 FOREIGN KEY (event_id) REFERENCES event (id) ON DELETE CASCADE",
                &[],
            )
        })
        .downgrade(|manager| {
            manager.drop_table(Table::drop().table("ticket").if_exists().to_owned())
        })
}
