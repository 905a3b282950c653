//! Revision: add proposal
//! Revises: 1975ea83b712
//! Generated: 2024-02-03 16:40:22 UTC

use revchain::migration::Revision;
use sea_query::{ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, Table};

pub const REVISION: &str = "27a6b0f3c0d1";
pub const DOWN_REVISION: &str = "1975ea83b712";

pub fn revision() -> Revision {
    Revision::new(REVISION, "add proposal")
        .revises(DOWN_REVISION)
        .upgrade(|manager| {
            manager.create_table(
                Table::create()
                    .table("proposal")
                    .if_not_exists()
                    .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new("event_id").integer().not_null())
                    .col(ColumnDef::new("speaker_id").integer().null())
                    .col(ColumnDef::new("title").string_len(255).not_null())
                    .col(ColumnDef::new("abstract").text().null())
                    .col(ColumnDef::new("state").string_len(32).not_null().default("pending"))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_proposal_event")
                            .from("proposal", "event_id")
                            .to("event", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_proposal_speaker")
                            .from("proposal", "speaker_id")
                            .to("user", "id")
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )?;

            manager.create_index(
                Index::create()
                    .name("idx_proposal_event_id")
                    .table("proposal")
                    .col(Expr::col("event_id"))
                    .if_not_exists()
                    .to_owned(),
            )
        })
        .downgrade(|manager| {
            manager.drop_index(Index::drop().name("idx_proposal_event_id").if_exists().to_owned())?;
            manager.drop_table(Table::drop().table("proposal").if_exists().to_owned())
        })
}
