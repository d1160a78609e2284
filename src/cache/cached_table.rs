//! # Cached Table
//!
//! Keyed, TTL-aware write-through cache over one backing [`Table`].
//!
//! Per key a row is absent, cached-fresh or cached-expired. A read of an
//! absent key queries the backing table; a read of an expired key either
//! re-downloads the row or evicts it, depending on the [`ExpirationAction`].
//! [`CachedTable::set`] writes through immediately; [`CachedTable::stage`]
//! only marks the row dirty until the next upload.
//!
//! Operations on one table are serialized by a mutex that is held while the
//! backing table is queried, so they block and must not run on the scheduler
//! thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::expiration::ExpirationAction;
use super::resolver::{ColumnResolver, ColumnValue};
use super::row::CachedRow;
use crate::config::CacheConfig;
use crate::database::{ColumnLiterals, RowSet, Table};
use crate::error::{AsyncSqlError, Result};
use crate::logging::log_cache_operation;

type RowMap = HashMap<String, CachedRow>;

/// Shared handle to one cached dataset. Clones share the same rows.
#[derive(Clone)]
pub struct CachedTable {
    inner: Arc<CachedTableInner>,
}

struct CachedTableInner {
    table: Table,
    selection_column: String,
    resolver: Arc<dyn ColumnResolver>,
    action: ExpirationAction,
    ttl: Option<Duration>,
    rows: Mutex<RowMap>,
}

impl CachedTable {
    /// Build the cache and register it with the table's connection.
    ///
    /// `ttl = None` means rows never expire.
    pub fn new(
        table: Table,
        selection_column: impl Into<String>,
        resolver: Arc<dyn ColumnResolver>,
        action: ExpirationAction,
        ttl: Option<Duration>,
    ) -> Self {
        let cached = Self {
            inner: Arc::new(CachedTableInner {
                table,
                selection_column: selection_column.into(),
                resolver,
                action,
                ttl,
                rows: Mutex::new(HashMap::new()),
            }),
        };
        cached
            .inner
            .table
            .connection()
            .cache_manager()
            .register(cached.clone());
        cached
    }

    /// Like [`CachedTable::new`] with the TTL taken from configuration
    pub fn from_config(
        table: Table,
        selection_column: impl Into<String>,
        resolver: Arc<dyn ColumnResolver>,
        action: ExpirationAction,
        config: &CacheConfig,
    ) -> Self {
        Self::new(table, selection_column, resolver, action, config.default_ttl())
    }

    pub fn name(&self) -> &str {
        self.inner.table.name()
    }

    pub fn table(&self) -> &Table {
        &self.inner.table
    }

    pub fn selection_column(&self) -> &str {
        &self.inner.selection_column
    }

    pub fn resolver(&self) -> &Arc<dyn ColumnResolver> {
        &self.inner.resolver
    }

    pub fn expiration_action(&self) -> ExpirationAction {
        self.inner.action
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl
    }

    /// Same underlying cache
    pub fn ptr_eq(&self, other: &CachedTable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The row for `key`, loading it on a miss and applying the expiration
    /// action when it is stale.
    ///
    /// An expired row whose backing record has disappeared is evicted and
    /// reported as [`AsyncSqlError::CacheConsistency`] under
    /// [`ExpirationAction::Download`].
    pub fn get(&self, key: &str) -> Result<Option<CachedRow>> {
        let mut rows = self.inner.rows.lock();
        self.get_locked(&mut rows, key)
    }

    /// The row for `key`, inserting `defaults` into the backing table on a miss.
    ///
    /// The selection column is added to `defaults` when missing.
    pub fn get_or_default(&self, key: &str, defaults: HashMap<String, ColumnValue>) -> Result<CachedRow> {
        let mut rows = self.inner.rows.lock();
        if let Some(row) = self.get_locked(&mut rows, key)? {
            return Ok(row);
        }

        let values = self.with_selection(key, defaults);
        self.inner.table.insert(&self.encode_values(&values)?).wait()?;
        log_cache_operation(self.name(), "insert_default", Some(key), "ok");

        match self.fetch_from_backing(key)? {
            Some(row) => {
                rows.insert(key.to_string(), row.clone());
                Ok(row)
            }
            None => Err(self.consistency_error(key)),
        }
    }

    /// Replace the row for `key` and write it through to the backing table.
    ///
    /// On a failed upload the row stays cached and dirty, and the error is
    /// returned.
    pub fn set(&self, key: &str, values: HashMap<String, ColumnValue>) -> Result<CachedRow> {
        let mut rows = self.inner.rows.lock();
        self.put_locked(&mut rows, key, values);
        match self.upload_locked(&mut rows, key) {
            Ok(_) => {
                log_cache_operation(self.name(), "set", Some(key), "ok");
                rows.get(key)
                    .cloned()
                    .ok_or_else(|| self.consistency_error(key))
            }
            Err(e) => {
                log_cache_operation(self.name(), "set", Some(key), "upload_failed");
                Err(e)
            }
        }
    }

    /// Replace the row for `key` in memory only and mark it dirty.
    pub fn stage(&self, key: &str, values: HashMap<String, ColumnValue>) -> CachedRow {
        let mut rows = self.inner.rows.lock();
        let row = self.put_locked(&mut rows, key, values);
        row.set_dirty(true);
        log_cache_operation(self.name(), "stage", Some(key), "dirty");
        row.clone()
    }

    /// Evict `key` and delete its backing record if there is one.
    ///
    /// Returns the evicted row whatever the outcome of the delete.
    pub fn remove(&self, key: &str) -> Option<CachedRow> {
        let mut rows = self.inner.rows.lock();
        let evicted = rows.remove(key);

        let deleted = self.has_on_backing(key).and_then(|present| {
            if present {
                let condition = self.key_condition(key)?;
                self.inner.table.remove(&condition).wait()?;
            }
            Ok(present)
        });
        match deleted {
            Ok(present) => {
                let status = if present { "deleted" } else { "not_on_backing" };
                log_cache_operation(self.name(), "remove", Some(key), status);
            }
            Err(e) => {
                warn!(table = %self.name(), key = %key, error = %e, "Backing delete failed");
            }
        }
        evicted
    }

    /// Evict `key` without touching the backing table
    pub fn remove_from_cache(&self, key: &str) -> Option<CachedRow> {
        self.inner.rows.lock().remove(key)
    }

    /// Whether `key` is cached, fresh or not
    pub fn has(&self, key: &str) -> bool {
        self.inner.rows.lock().contains_key(key)
    }

    pub fn has_on_backing(&self, key: &str) -> Result<bool> {
        self.inner.table.has_entry(&self.key_condition(key)?).wait()
    }

    /// Read `key` from the backing table without caching it
    pub fn fetch_from_backing(&self, key: &str) -> Result<Option<CachedRow>> {
        let condition = self.key_condition(key)?;
        let result = self.inner.table.select_all(Some(&condition), Some(1)).wait()?;
        self.decode_first(key, &result)
    }

    /// Persist the cached row for `key`. Returns `false` when it is not cached.
    pub fn upload_row(&self, key: &str) -> Result<bool> {
        let mut rows = self.inner.rows.lock();
        self.upload_locked(&mut rows, key)
    }

    /// Replace the cached row for `key` with the backing record.
    ///
    /// Fails with [`AsyncSqlError::CacheConsistency`] when the backing table no
    /// longer has it; the cache is left unchanged in that case.
    pub fn download_row(&self, key: &str) -> Result<CachedRow> {
        let mut rows = self.inner.rows.lock();
        self.download_locked(&mut rows, key)
    }

    /// Upload every cached row independently
    pub fn upload(&self) -> Result<()> {
        let mut rows = self.inner.rows.lock();
        let keys: Vec<String> = rows.keys().cloned().collect();
        let failed = keys
            .iter()
            .filter(|key| match self.upload_locked(&mut rows, key) {
                Ok(_) => false,
                Err(e) => {
                    warn!(table = %self.name(), key = %key, error = %e, "Row upload failed");
                    true
                }
            })
            .count();
        partial_failure("upload", failed, keys.len())
    }

    /// Download every cached row independently
    pub fn download(&self) -> Result<()> {
        let mut rows = self.inner.rows.lock();
        let keys: Vec<String> = rows.keys().cloned().collect();
        let failed = keys
            .iter()
            .filter(|key| match self.download_locked(&mut rows, key) {
                Ok(_) => false,
                Err(e) => {
                    warn!(table = %self.name(), key = %key, error = %e, "Row download failed");
                    true
                }
            })
            .count();
        partial_failure("download", failed, keys.len())
    }

    /// Copy of every cached row, keyed by selection value
    pub fn snapshot(&self) -> HashMap<String, CachedRow> {
        self.inner.rows.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.rows.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows.lock().is_empty()
    }

    fn get_locked(&self, rows: &mut RowMap, key: &str) -> Result<Option<CachedRow>> {
        let expired = match rows.get(key) {
            Some(row) if !row.is_expired(self.inner.ttl) => return Ok(Some(row.clone())),
            Some(row) => Some(row.is_dirty()),
            None => None,
        };

        let Some(dirty) = expired else {
            let loaded = self.fetch_from_backing(key)?;
            if let Some(row) = &loaded {
                rows.insert(key.to_string(), row.clone());
                log_cache_operation(self.name(), "load", Some(key), "miss_loaded");
            }
            return Ok(loaded);
        };

        if dirty {
            // Staged changes reach the backing table before the row is refreshed or dropped
            self.upload_locked(rows, key)?;
        }

        match self.inner.action {
            ExpirationAction::Delete => {
                rows.remove(key);
                log_cache_operation(self.name(), "expire", Some(key), "evicted");
                Ok(None)
            }
            ExpirationAction::Download => match self.download_locked(rows, key) {
                Ok(row) => {
                    log_cache_operation(self.name(), "expire", Some(key), "refreshed");
                    Ok(Some(row))
                }
                Err(e @ AsyncSqlError::CacheConsistency { .. }) => {
                    rows.remove(key);
                    Err(e)
                }
                Err(e) => Err(e),
            },
        }
    }

    fn put_locked<'a>(
        &self,
        rows: &'a mut RowMap,
        key: &str,
        values: HashMap<String, ColumnValue>,
    ) -> &'a mut CachedRow {
        let values = self.with_selection(key, values);
        let row = rows
            .entry(key.to_string())
            .or_insert_with(|| CachedRow::new(key, HashMap::new()));
        row.replace_values(values);
        row
    }

    fn upload_locked(&self, rows: &mut RowMap, key: &str) -> Result<bool> {
        let Some(row) = rows.get_mut(key) else {
            return Ok(false);
        };
        let literals = self.encode_values(row.values())?;

        let uploaded = self.has_on_backing(key).and_then(|present| {
            if present {
                let condition = self.key_condition(key)?;
                self.inner
                    .table
                    .update_multiple(&literals, Some(&condition))
                    .wait()
            } else {
                self.inner.table.insert(&literals).wait()
            }
        });

        match uploaded {
            Ok(()) => {
                row.set_dirty(false);
                debug!(table = %self.name(), key = %key, "Row uploaded");
                Ok(true)
            }
            Err(e) => {
                row.set_dirty(true);
                Err(e)
            }
        }
    }

    fn download_locked(&self, rows: &mut RowMap, key: &str) -> Result<CachedRow> {
        let fresh = self
            .fetch_from_backing(key)?
            .ok_or_else(|| self.consistency_error(key))?;

        let row = rows
            .entry(key.to_string())
            .or_insert_with(|| CachedRow::new(key, HashMap::new()));
        row.replace_values(fresh.values().clone());
        row.refresh();
        row.set_dirty(false);
        Ok(row.clone())
    }

    fn decode_first(&self, key: &str, result: &RowSet) -> Result<Option<CachedRow>> {
        let Some(record) = result.first() else {
            return Ok(None);
        };
        let values = record
            .iter()
            .map(|(column, cell)| {
                self.inner
                    .resolver
                    .decode(column, cell)
                    .map(|value| (column.to_string(), value))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Some(CachedRow::new(key, values)))
    }

    fn encode_values(&self, values: &HashMap<String, ColumnValue>) -> Result<ColumnLiterals> {
        values
            .iter()
            .map(|(column, value)| {
                self.inner
                    .resolver
                    .encode(column, value)
                    .map(|literal| (column.clone(), literal))
            })
            .collect()
    }

    fn key_condition(&self, key: &str) -> Result<String> {
        let column = &self.inner.selection_column;
        let literal = self
            .inner
            .resolver
            .encode(column, &ColumnValue::Text(key.to_string()))?;
        Ok(Table::eq_condition(column, &literal))
    }

    fn with_selection(
        &self,
        key: &str,
        mut values: HashMap<String, ColumnValue>,
    ) -> HashMap<String, ColumnValue> {
        values
            .entry(self.inner.selection_column.clone())
            .or_insert_with(|| ColumnValue::Text(key.to_string()));
        values
    }

    fn consistency_error(&self, key: &str) -> AsyncSqlError {
        AsyncSqlError::CacheConsistency {
            table: self.name().to_string(),
            key: key.to_string(),
        }
    }
}

impl std::fmt::Debug for CachedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTable")
            .field("table", &self.name())
            .field("selection_column", &self.inner.selection_column)
            .field("action", &self.inner.action)
            .field("ttl", &self.inner.ttl)
            .field("rows", &self.len())
            .finish()
    }
}

pub(crate) fn partial_failure(operation: &str, failed: usize, total: usize) -> Result<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(AsyncSqlError::PartialFailure {
            operation: operation.to_string(),
            failed,
            total,
        })
    }
}
