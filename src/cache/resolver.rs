//! Column value encoding.
//!
//! Cached rows hold [`ColumnValue`]s. A [`ColumnResolver`] turns backing-table
//! cells into values and values into SQL literals, per column. Asking a
//! resolver about a column it does not know is a configuration error
//! ([`AsyncSqlError::UnrecognizedColumn`]), never a data error.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::database::SqlValue;
use crate::error::{AsyncSqlError, Result};

/// A typed cell value held in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Double(f64),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer variant, widened
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) => Some(i64::from(*v)),
            ColumnValue::Long(v) => Some(*v),
            ColumnValue::Short(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Text(s) => write!(f, "{s}"),
            ColumnValue::Integer(v) => write!(f, "{v}"),
            ColumnValue::Long(v) => write!(f, "{v}"),
            ColumnValue::Short(v) => write!(f, "{v}"),
            ColumnValue::Boolean(v) => write!(f, "{v}"),
            ColumnValue::Double(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Long(value)
    }
}

impl From<i16> for ColumnValue {
    fn from(value: i16) -> Self {
        ColumnValue::Short(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Boolean(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Double(value)
    }
}

/// Declared type of a cached column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Text,
    Integer,
    Long,
    Short,
    Boolean,
    Double,
}

/// Per-column encode/decode strategy for one cached table
pub trait ColumnResolver: Send + Sync {
    /// Backing-table cell → cached value
    fn decode(&self, column: &str, value: &SqlValue) -> Result<ColumnValue>;

    /// Cached value → SQL literal
    fn encode(&self, column: &str, value: &ColumnValue) -> Result<String>;
}

/// Resolver driven by a column → [`ColumnKind`] map
///
/// ```rust
/// use asyncsql_core::cache::{ColumnKind, ColumnResolver, ColumnValue, SchemaResolver};
///
/// let resolver = SchemaResolver::new()
///     .column("UUID", ColumnKind::Text)
///     .column("Cooldown", ColumnKind::Long);
/// assert_eq!(resolver.encode("UUID", &ColumnValue::from("o'neil")).unwrap(), "'o''neil'");
/// assert!(resolver.encode("Unknown", &ColumnValue::Null).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaResolver {
    kinds: HashMap<String, ColumnKind>,
}

impl SchemaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    /// Exact name first, then a case-insensitive match
    pub fn kind_of(&self, column: &str) -> Result<ColumnKind> {
        self.kinds
            .get(column)
            .or_else(|| {
                self.kinds
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map(|(_, kind)| kind)
            })
            .copied()
            .ok_or_else(|| AsyncSqlError::UnrecognizedColumn {
                column: column.to_string(),
            })
    }
}

impl ColumnResolver for SchemaResolver {
    fn decode(&self, column: &str, value: &SqlValue) -> Result<ColumnValue> {
        let kind = self.kind_of(column)?;
        if value.is_null() {
            return Ok(ColumnValue::Null);
        }
        let invalid = |reason: &str| AsyncSqlError::InvalidValue {
            column: column.to_string(),
            reason: format!("{reason} (got {value})"),
        };

        match kind {
            ColumnKind::Text => match value {
                SqlValue::Blob(bytes) => String::from_utf8(bytes.clone())
                    .map(ColumnValue::Text)
                    .map_err(|_| invalid("text column holds non-UTF-8 bytes")),
                other => Ok(ColumnValue::Text(other.to_string())),
            },
            ColumnKind::Long => integer_of(value)
                .map(ColumnValue::Long)
                .ok_or_else(|| invalid("expected an integer")),
            ColumnKind::Integer => integer_of(value)
                .and_then(|v| i32::try_from(v).ok())
                .map(ColumnValue::Integer)
                .ok_or_else(|| invalid("expected a 32-bit integer")),
            ColumnKind::Short => integer_of(value)
                .and_then(|v| i16::try_from(v).ok())
                .map(ColumnValue::Short)
                .ok_or_else(|| invalid("expected a 16-bit integer")),
            ColumnKind::Boolean => match value {
                SqlValue::Integer(v) => Ok(ColumnValue::Boolean(*v != 0)),
                SqlValue::Text(s) => parse_bool(s)
                    .map(ColumnValue::Boolean)
                    .ok_or_else(|| invalid("expected a boolean")),
                _ => Err(invalid("expected a boolean")),
            },
            ColumnKind::Double => match value {
                SqlValue::Real(v) => Ok(ColumnValue::Double(*v)),
                SqlValue::Integer(v) => Ok(ColumnValue::Double(*v as f64)),
                SqlValue::Text(s) => s
                    .trim()
                    .parse()
                    .map(ColumnValue::Double)
                    .map_err(|_| invalid("expected a number")),
                _ => Err(invalid("expected a number")),
            },
        }
    }

    fn encode(&self, column: &str, value: &ColumnValue) -> Result<String> {
        let kind = self.kind_of(column)?;
        if value.is_null() {
            return Ok("NULL".to_string());
        }
        let invalid = |reason: &str| AsyncSqlError::InvalidValue {
            column: column.to_string(),
            reason: format!("{reason} (got {value:?})"),
        };

        match kind {
            ColumnKind::Text => Ok(quote_literal(&value.to_string())),
            ColumnKind::Integer | ColumnKind::Long | ColumnKind::Short => {
                let number = match value {
                    ColumnValue::Text(s) => s.trim().parse::<i64>().ok(),
                    ColumnValue::Boolean(b) => Some(i64::from(*b)),
                    other => other.as_i64(),
                }
                .ok_or_else(|| invalid("expected an integer"))?;

                let fits = match kind {
                    ColumnKind::Integer => i32::try_from(number).is_ok(),
                    ColumnKind::Short => i16::try_from(number).is_ok(),
                    _ => true,
                };
                if fits {
                    Ok(number.to_string())
                } else {
                    Err(invalid("integer out of range for column"))
                }
            }
            ColumnKind::Boolean => match value {
                ColumnValue::Boolean(b) => Ok(if *b { "1" } else { "0" }.to_string()),
                ColumnValue::Text(s) => parse_bool(s)
                    .map(|b| if b { "1" } else { "0" }.to_string())
                    .ok_or_else(|| invalid("expected a boolean")),
                other => match other.as_i64() {
                    Some(0) => Ok("0".to_string()),
                    Some(1) => Ok("1".to_string()),
                    _ => Err(invalid("expected a boolean")),
                },
            },
            ColumnKind::Double => {
                let number = match value {
                    ColumnValue::Text(s) => s.trim().parse::<f64>().ok(),
                    other => other.as_f64(),
                }
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid("expected a finite number"))?;
                Ok(number.to_string())
            }
        }
    }
}

/// Single-quoted SQL string literal with embedded quotes doubled
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

fn integer_of(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Real(v) if v.fract() != 0.0 => None,
        other => other.as_i64(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
