//! Per-connection registry of cached tables with bulk upload and download.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::cached_table::{partial_failure, CachedTable};
use super::row::CachedRow;
use crate::error::Result;

/// Every [`CachedTable`] built over one connection's tables.
///
/// Bulk operations visit each table independently; one failing table does
/// not stop the others, and the combined result reports how many tables
/// failed as [`AsyncSqlError::PartialFailure`](crate::error::AsyncSqlError::PartialFailure).
#[derive(Clone, Default)]
pub struct CacheManager {
    tables: Arc<Mutex<Vec<CachedTable>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by identity. Returns `false` when already registered.
    pub fn register(&self, table: CachedTable) -> bool {
        let mut tables = self.tables.lock();
        if tables.iter().any(|t| t.ptr_eq(&table)) {
            return false;
        }
        tables.push(table);
        true
    }

    /// Snapshot of the registered tables
    pub fn list(&self) -> Vec<CachedTable> {
        self.tables.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.tables.lock().clear();
    }

    /// Each table paired with a copy of its rows
    pub fn full_data(&self) -> Vec<(CachedTable, HashMap<String, CachedRow>)> {
        self.list()
            .into_iter()
            .map(|table| {
                let rows = table.snapshot();
                (table, rows)
            })
            .collect()
    }

    pub fn upload_all(&self) -> Result<()> {
        self.upload_filtered(|_, _| true)
    }

    pub fn download_all(&self) -> Result<()> {
        self.download_filtered(|_, _| true)
    }

    /// Upload the tables for which `filter(table, rows)` holds
    pub fn upload_filtered(&self, filter: impl Fn(&CachedTable, &HashMap<String, CachedRow>) -> bool) -> Result<()> {
        self.for_each_filtered("upload_all", filter, CachedTable::upload)
    }

    /// Download the tables for which `filter(table, rows)` holds
    pub fn download_filtered(&self, filter: impl Fn(&CachedTable, &HashMap<String, CachedRow>) -> bool) -> Result<()> {
        self.for_each_filtered("download_all", filter, CachedTable::download)
    }

    fn for_each_filtered(
        &self,
        operation: &str,
        filter: impl Fn(&CachedTable, &HashMap<String, CachedRow>) -> bool,
        apply: impl Fn(&CachedTable) -> Result<()>,
    ) -> Result<()> {
        let selected: Vec<CachedTable> = self
            .full_data()
            .into_iter()
            .filter(|(table, rows)| filter(table, rows))
            .map(|(table, _)| table)
            .collect();

        let failed = selected
            .iter()
            .filter(|table| match apply(table) {
                Ok(()) => false,
                Err(e) => {
                    warn!(table = %table.name(), operation = %operation, error = %e, "Bulk cache operation failed");
                    true
                }
            })
            .count();

        info!(
            operation = %operation,
            tables = selected.len(),
            failed,
            "Bulk cache operation finished"
        );
        partial_failure(operation, failed, selected.len())
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.list().iter().map(|t| t.name().to_string()).collect();
        f.debug_struct("CacheManager").field("tables", &names).finish()
    }
}
