//! Row type and value conversion between `sea_query::Value` and `may_postgres`.
//!
//! Parameter conversion follows a two-pass pattern:
//! 1. First pass: collect all values into typed vectors
//! 2. Second pass: create references to the stored values
//!
//! This keeps the references valid for the duration of the closure that runs the statement.

use crate::executor::DbError;
use may_postgres::types::{ToSql, Type};
use sea_query::Value;

/// A decoded result row
///
/// Column names are kept alongside the values so callers can read by name or by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from parallel column/value lists
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the column called `name`
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Read a text column, `None` for SQL NULL
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing or not text.
    pub fn try_string(&self, index: usize) -> Result<Option<String>, DbError> {
        match self.values.get(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(DbError::ParseError(format!(
                "column {index} is not text: {other:?}"
            ))),
            None => Err(missing(index)),
        }
    }

    /// Read an integer column of any width, `None` for SQL NULL
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing or not an integer.
    pub fn try_i64(&self, index: usize) -> Result<Option<i64>, DbError> {
        match self.values.get(index) {
            Some(Value::SmallInt(v)) => Ok(v.map(i64::from)),
            Some(Value::Int(v)) => Ok(v.map(i64::from)),
            Some(Value::BigInt(v)) => Ok(*v),
            Some(other) => Err(DbError::ParseError(format!(
                "column {index} is not an integer: {other:?}"
            ))),
            None => Err(missing(index)),
        }
    }

    /// Read a boolean column, `None` for SQL NULL
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing or not a boolean.
    pub fn try_bool(&self, index: usize) -> Result<Option<bool>, DbError> {
        match self.values.get(index) {
            Some(Value::Bool(v)) => Ok(*v),
            Some(other) => Err(DbError::ParseError(format!(
                "column {index} is not a boolean: {other:?}"
            ))),
            None => Err(missing(index)),
        }
    }

    /// Whether the value at `index` is SQL NULL
    pub fn is_null(&self, index: usize) -> bool {
        matches!(
            self.values.get(index),
            Some(
                Value::Bool(None)
                    | Value::SmallInt(None)
                    | Value::Int(None)
                    | Value::BigInt(None)
                    | Value::Double(None)
                    | Value::String(None)
            )
        )
    }
}

fn missing(index: usize) -> DbError {
    DbError::ParseError(format!("row has no column {index}"))
}

/// Decode a `may_postgres::Row` into a [`Row`]
///
/// UUID and timestamp columns are surfaced as text so callers don't depend on driver types.
///
/// # Errors
///
/// Returns `DbError::ParseError` for column types the migration layer does not read.
pub fn from_pg_row(row: &may_postgres::Row) -> Result<Row, DbError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            Value::Bool(row.try_get::<_, Option<bool>>(i)?)
        } else if *ty == Type::INT2 {
            Value::SmallInt(row.try_get::<_, Option<i16>>(i)?)
        } else if *ty == Type::INT4 {
            Value::Int(row.try_get::<_, Option<i32>>(i)?)
        } else if *ty == Type::INT8 {
            Value::BigInt(row.try_get::<_, Option<i64>>(i)?)
        } else if *ty == Type::FLOAT8 {
            Value::Double(row.try_get::<_, Option<f64>>(i)?)
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            Value::String(row.try_get::<_, Option<String>>(i)?)
        } else if *ty == Type::UUID {
            let uuid: Option<uuid::Uuid> = row.try_get(i)?;
            Value::String(uuid.map(|u| u.to_string()))
        } else if *ty == Type::TIMESTAMP {
            let ts: Option<chrono::NaiveDateTime> = row.try_get(i)?;
            Value::String(ts.map(|t| t.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            let ts: Option<chrono::DateTime<chrono::Utc>> = row.try_get(i)?;
            Value::String(ts.map(|t| t.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        } else {
            return Err(DbError::ParseError(format!(
                "unsupported column type {} for column '{}'",
                ty,
                column.name()
            )));
        };
        columns.push(column.name().to_string());
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

/// Convert `sea_query` values to `may_postgres` `ToSql` parameters and run `f` with them.
///
/// # Errors
///
/// Returns `DbError::Other` if an unsupported value type is encountered.
pub fn with_converted_params<F, R>(values: &[Value], f: F) -> Result<R, DbError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, DbError>,
{
    let mut bools: Vec<bool> = Vec::new();
    let mut small_ints: Vec<i16> = Vec::new();
    let mut ints: Vec<i32> = Vec::new();
    let mut big_ints: Vec<i64> = Vec::new();
    let mut doubles: Vec<f64> = Vec::new();
    let mut strings: Vec<String> = Vec::new();
    let mut nulls: Vec<Option<String>> = Vec::new();

    // First pass: collect all values into typed vectors
    for value in values {
        match value {
            Value::Bool(Some(b)) => bools.push(*b),
            Value::TinyInt(Some(i)) => small_ints.push(i16::from(*i)),
            Value::SmallInt(Some(i)) => small_ints.push(*i),
            Value::Int(Some(i)) => ints.push(*i),
            Value::BigInt(Some(i)) => big_ints.push(*i),
            Value::Double(Some(d)) => doubles.push(*d),
            Value::String(Some(s)) => strings.push(s.clone()),
            Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::Double(None)
            | Value::String(None) => nulls.push(None),
            _ => {
                return Err(DbError::Other(format!(
                    "Unsupported value type in query: {value:?}"
                )));
            }
        }
    }

    // Second pass: create references to the stored values
    let (mut b, mut si, mut i, mut bi, mut d, mut s, mut n) = (0, 0, 0, 0, 0, 0, 0);
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.len());

    for value in values {
        match value {
            Value::Bool(Some(_)) => {
                params.push(&bools[b]);
                b += 1;
            }
            Value::TinyInt(Some(_)) | Value::SmallInt(Some(_)) => {
                params.push(&small_ints[si]);
                si += 1;
            }
            Value::Int(Some(_)) => {
                params.push(&ints[i]);
                i += 1;
            }
            Value::BigInt(Some(_)) => {
                params.push(&big_ints[bi]);
                bi += 1;
            }
            Value::Double(Some(_)) => {
                params.push(&doubles[d]);
                d += 1;
            }
            Value::String(Some(_)) => {
                params.push(&strings[s]);
                s += 1;
            }
            _ => {
                params.push(&nulls[n]);
                n += 1;
            }
        }
    }

    f(&params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".into(), "email".into(), "active".into(), "uuid".into()],
            vec![
                Value::Int(Some(7)),
                Value::String(Some("ada@example.org".into())),
                Value::Bool(Some(true)),
                Value::String(None),
            ],
        )
    }

    #[test]
    fn test_row_typed_accessors() {
        let row = sample();
        assert_eq!(row.try_i64(0).unwrap(), Some(7));
        assert_eq!(row.try_string(1).unwrap().as_deref(), Some("ada@example.org"));
        assert_eq!(row.try_bool(2).unwrap(), Some(true));
        assert_eq!(row.try_string(3).unwrap(), None);
        assert!(row.is_null(3));
        assert!(!row.is_null(0));
    }

    #[test]
    fn test_row_type_mismatch_and_missing_column() {
        let row = sample();
        assert!(matches!(row.try_i64(1), Err(DbError::ParseError(_))));
        assert!(matches!(row.try_string(9), Err(DbError::ParseError(_))));
    }

    #[test]
    fn test_row_get_by_name() {
        let row = sample();
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(Some(7))));
        assert_eq!(row.get_by_name("nope"), None);
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn test_converted_params_preserve_count() {
        let values = vec![
            Value::BigInt(Some(1)),
            Value::String(Some("x".into())),
            Value::String(None),
            Value::Bool(Some(false)),
        ];
        let count = with_converted_params(&values, |params| Ok(params.len())).unwrap();
        assert_eq!(count, 4);
    }
}
