//! Key/value specialization of [`CachedTable`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::cached_table::CachedTable;
use super::expiration::ExpirationAction;
use super::resolver::{ColumnResolver, ColumnValue};
use super::row::CachedRow;
use crate::database::Table;
use crate::error::{AsyncSqlError, Result};

/// Two-column cache: the selection column is the key, `value_column` the value.
#[derive(Clone, Debug)]
pub struct KvStorage {
    cached: CachedTable,
    value_column: String,
}

impl KvStorage {
    pub fn new(
        table: Table,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
        resolver: Arc<dyn ColumnResolver>,
        action: ExpirationAction,
        ttl: Option<Duration>,
    ) -> Self {
        Self::from_cached(CachedTable::new(table, key_column, resolver, action, ttl), value_column)
    }

    pub fn from_cached(cached: CachedTable, value_column: impl Into<String>) -> Self {
        Self {
            cached,
            value_column: value_column.into(),
        }
    }

    pub fn cached_table(&self) -> &CachedTable {
        &self.cached
    }

    pub fn key_column(&self) -> &str {
        self.cached.selection_column()
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    /// Write-through `key → value`
    pub fn set(&self, key: &str, value: impl Into<ColumnValue>) -> Result<CachedRow> {
        self.cached.set(key, self.pair(key, value.into()))
    }

    pub fn get(&self, key: &str) -> Result<Option<ColumnValue>> {
        match self.cached.get(key)? {
            Some(row) => self.value_of(&row).map(Some),
            None => Ok(None),
        }
    }

    /// The stored value, inserting `default` into the backing table on a miss
    pub fn get_or_default(&self, key: &str, default: impl Into<ColumnValue>) -> Result<ColumnValue> {
        let row = self
            .cached
            .get_or_default(key, self.pair(key, default.into()))?;
        self.value_of(&row)
    }

    pub fn remove(&self, key: &str) -> Option<CachedRow> {
        self.cached.remove(key)
    }

    fn pair(&self, key: &str, value: ColumnValue) -> HashMap<String, ColumnValue> {
        HashMap::from([
            (self.key_column().to_string(), ColumnValue::Text(key.to_string())),
            (self.value_column.clone(), value),
        ])
    }

    fn value_of(&self, row: &CachedRow) -> Result<ColumnValue> {
        row.get(&self.value_column)
            .cloned()
            .ok_or_else(|| AsyncSqlError::UnrecognizedColumn {
                column: self.value_column.clone(),
            })
    }
}
