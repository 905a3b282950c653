//! Revision: create user and event
//! Revises: <base>
//! Generated: 2024-01-12 09:14:03 UTC

use revchain::migration::Revision;
use sea_query::Table;

pub const REVISION: &str = "1975ea83b712";
pub const DOWN_REVISION: Option<&str> = None;

pub fn revision() -> Revision {
    Revision::new(REVISION, "create user and event")
        .upgrade(|manager| {
            manager.execute(
                r#"
                CREATE TABLE IF NOT EXISTS "user" (
                    id SERIAL PRIMARY KEY,
                    email VARCHAR(255) NOT NULL UNIQUE,
                    password VARCHAR(255),
                    name VARCHAR(255),
                    admin BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
                )
                "#,
                &[],
            )?;

            manager.execute(
                r#"
                CREATE TABLE IF NOT EXISTS event (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    description TEXT,
                    starts_at TIMESTAMP,
                    ends_at TIMESTAMP,
                    location VARCHAR(255),
                    creator_id INTEGER REFERENCES "user" (id) ON DELETE SET NULL,
                    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
                )
                "#,
                &[],
            )?;

            manager.execute(
                "CREATE INDEX IF NOT EXISTS idx_event_starts_at ON event (starts_at)",
                &[],
            )
        })
        .downgrade(|manager| {
            manager.drop_table(Table::drop().table("event").if_exists().to_owned())?;
            manager.drop_table(Table::drop().table("user").if_exists().to_owned())
        })
}
