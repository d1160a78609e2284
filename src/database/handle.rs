//! Blocking driver seam.
//!
//! The scheduler thread owns every [`DatabaseHandle`]; nothing here is async.
//! Result rows are copied into an owned [`RowSet`] so they can be cloned into
//! futures and handed to other threads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::info::ConnectionInfo;
use crate::error::Result;

/// One materialized cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s}"),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Owned result of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn first(&self) -> Option<Row<'_>> {
        self.row(0)
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// Borrowed view of one row with column-name lookup
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> Row<'a> {
    /// Case-insensitive, matching how SQL treats column names
    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> &'a [SqlValue] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// A live, blocking database handle. Only the scheduler thread calls it.
pub trait DatabaseHandle: Send {
    /// Run a statement that returns rows
    fn query(&mut self, sql: &str) -> Result<RowSet>;

    /// Run a statement, returning the affected row count
    fn execute(&mut self, sql: &str) -> Result<u64>;

    fn is_closed(&self) -> bool;

    fn close(&mut self) -> Result<()>;

    fn table_exists(&mut self, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = '{}'",
            name.replace('\'', "''")
        );
        Ok(!self.query(&sql)?.is_empty())
    }
}

/// Opens handles for a [`Connection`](super::Connection)
pub trait Connector: Send + Sync {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn DatabaseHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowSet {
        RowSet::new(
            vec!["UUID".into(), "Cooldown".into()],
            vec![
                vec![SqlValue::Text("a".into()), SqlValue::Integer(10)],
                vec![SqlValue::Text("b".into()), SqlValue::Null],
            ],
        )
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let rows = sample();
        let first = rows.first().unwrap();
        assert_eq!(first.get("uuid"), Some(&SqlValue::Text("a".into())));
        assert_eq!(first.get("COOLDOWN").and_then(SqlValue::as_i64), Some(10));
        assert!(first.get("missing").is_none());
        assert_eq!(rows.column_index("cooldown"), Some(1));
    }

    #[test]
    fn test_iteration_and_nulls() {
        let rows = sample();
        assert_eq!(rows.len(), 2);
        let nulls: Vec<bool> = rows
            .iter()
            .map(|r| r.get("Cooldown").map(SqlValue::is_null).unwrap_or(false))
            .collect();
        assert_eq!(nulls, vec![false, true]);
    }

    #[test]
    fn test_text_coerces_to_integer() {
        assert_eq!(SqlValue::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::Blob(vec![1]).as_i64(), None);
        assert_eq!(SqlValue::Null.to_string(), "NULL");
    }
}
