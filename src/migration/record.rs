//! `HistoryEntry` - rows of the history table, one per committed step

use crate::executor::DbError;
use crate::migration::revision::Direction;
use crate::row::Row;
use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub partition: String,
    pub revision: String,
    pub direction: Direction,
    /// `SHA-256` checksum of the revision at the time it ran
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(
        partition: &str,
        revision: &str,
        direction: Direction,
        checksum: String,
        execution_time_ms: Option<i64>,
    ) -> Self {
        Self {
            partition: partition.to_string(),
            revision: revision.to_string(),
            direction,
            checksum,
            applied_at: Utc::now(),
            execution_time_ms,
        }
    }

    /// Build an entry from a history row
    ///
    /// Expected column order: `partition`, `revision`, `direction`, `checksum`, `applied_at`,
    /// `execution_time_ms`
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` for missing columns, an unknown direction or an
    /// unparseable timestamp.
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        let text = |i: usize, name: &str| {
            row.try_string(i)?
                .ok_or_else(|| DbError::ParseError(format!("history column '{name}' is NULL")))
        };

        let direction = match text(2, "direction")?.as_str() {
            "upgrade" => Direction::Upgrade,
            "downgrade" => Direction::Downgrade,
            other => {
                return Err(DbError::ParseError(format!(
                    "unknown direction '{other}' in history"
                )))
            }
        };

        Ok(Self {
            partition: text(0, "partition")?,
            revision: text(1, "revision")?,
            direction,
            checksum: text(3, "checksum")?,
            applied_at: parse_timestamp(&text(4, "applied_at")?)?,
            execution_time_ms: row.try_i64(5)?,
        })
    }
}

/// Parse a `TIMESTAMP` rendered as text
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            DbError::ParseError(format!(
                "Failed to parse timestamp '{value}': unrecognized format"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::Value;

    fn row(direction: &str, applied_at: &str) -> Row {
        Row::new(
            vec![
                "partition".into(),
                "revision".into(),
                "direction".into(),
                "checksum".into(),
                "applied_at".into(),
                "execution_time_ms".into(),
            ],
            vec![
                Value::String(Some("default".into())),
                Value::String(Some("4f2c9a1b7d30".into())),
                Value::String(Some(direction.into())),
                Value::String(Some("ab".repeat(32))),
                Value::String(Some(applied_at.into())),
                Value::BigInt(Some(12)),
            ],
        )
    }

    #[test]
    fn test_from_row() {
        let entry = HistoryEntry::from_row(&row("upgrade", "2024-05-01 10:11:12.345")).unwrap();
        assert_eq!(entry.revision, "4f2c9a1b7d30");
        assert_eq!(entry.direction, Direction::Upgrade);
        assert_eq!(entry.execution_time_ms, Some(12));
        assert_eq!(entry.applied_at.timestamp(), 1_714_558_272);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01 10:11:12").is_ok());
        assert!(parse_timestamp("2024-05-01T10:11:12.5").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_unknown_direction_is_rejected() {
        assert!(HistoryEntry::from_row(&row("sideways", "2024-05-01 10:11:12")).is_err());
    }
}
