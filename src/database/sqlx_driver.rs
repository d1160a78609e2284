//! Production [`Connector`] over `sqlx::AnyConnection`.
//!
//! The backend is picked from the URL scheme (`mysql://`, `postgres://`,
//! `sqlite:`). Each handle owns a current-thread tokio runtime, so the
//! scheduler thread drives sqlx with `block_on` and never enters an async
//! context of its own.

use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Column, Connection as _, Row, ValueRef};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use super::handle::{Connector, DatabaseHandle, RowSet, SqlValue};
use super::info::ConnectionInfo;
use crate::error::{AsyncSqlError, Result};

/// Opens [`SqlxHandle`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

impl SqlxConnector {
    pub fn new() -> Self {
        sqlx::any::install_default_drivers();
        Self
    }
}

impl Connector for SqlxConnector {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn DatabaseHandle>> {
        sqlx::any::install_default_drivers();
        let handle = SqlxHandle::open(info)?;
        Ok(Box::new(handle))
    }
}

/// One open sqlx connection plus the runtime that drives it
pub struct SqlxHandle {
    runtime: Runtime,
    connection: Option<AnyConnection>,
    backend: String,
}

impl SqlxHandle {
    pub fn open(info: &ConnectionInfo) -> Result<Self> {
        let establishment = |reason: String| AsyncSqlError::ConnectionEstablishment {
            attempts: 1,
            reason,
        };

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| establishment(format!("failed to build driver runtime: {e}")))?;

        let url = info.to_url();
        let connection = runtime
            .block_on(AnyConnection::connect(&url))
            .map_err(|e| establishment(e.to_string()))?;
        let backend = connection.backend_name().to_string();

        debug!(url = %info.redacted_url(), backend = %backend, "Database handle opened");
        Ok(Self {
            runtime,
            connection: Some(connection),
            backend,
        })
    }

    pub fn backend_name(&self) -> &str {
        &self.backend
    }
}

impl DatabaseHandle for SqlxHandle {
    fn query(&mut self, sql: &str) -> Result<RowSet> {
        let runtime = &self.runtime;
        let connection = self.connection.as_mut().ok_or(AsyncSqlError::NotConnected)?;
        let rows = runtime.block_on(sqlx::query(sql).fetch_all(&mut *connection))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        Ok(RowSet::new(columns, values))
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        let runtime = &self.runtime;
        let connection = self.connection.as_mut().ok_or(AsyncSqlError::NotConnected)?;
        let done = runtime.block_on(sqlx::raw_sql(sql).execute(&mut *connection))?;
        Ok(done.rows_affected())
    }

    fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                self.runtime.block_on(connection.close())?;
                debug!(backend = %self.backend, "Database handle closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn table_exists(&mut self, name: &str) -> Result<bool> {
        let escaped = name.replace('\'', "''");
        let sql = if self.backend.eq_ignore_ascii_case("sqlite") {
            format!("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{escaped}'")
        } else {
            format!("SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = '{escaped}'")
        };
        Ok(!self.query(&sql)?.is_empty())
    }
}

impl Drop for SqlxHandle {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.runtime.block_on(connection.close()) {
                warn!(backend = %self.backend, error = %e, "Failed to close dropped database handle");
            }
        }
    }
}

fn decode_row(row: &AnyRow) -> Result<Vec<SqlValue>> {
    (0..row.len()).map(|index| decode_cell(row, index)).collect()
}

/// Narrowest representation first; the Any driver rejects mismatched kinds.
fn decode_cell(row: &AnyRow, index: usize) -> Result<SqlValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(SqlValue::Integer(value));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Ok(SqlValue::Real(value));
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(SqlValue::Text(value));
    }
    if let Ok(value) = row.try_get::<bool, _>(index) {
        return Ok(SqlValue::Integer(i64::from(value)));
    }
    if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(SqlValue::Blob(value));
    }
    Err(AsyncSqlError::TaskExecution(format!(
        "unsupported type in column `{}`",
        row.column(index).name()
    )))
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    fn memory() -> SqlxHandle {
        sqlx::any::install_default_drivers();
        SqlxHandle::open(&ConnectionInfo::from_url("sqlite::memory:")).expect("in-memory sqlite")
    }

    #[test]
    fn test_execute_and_query_roundtrip() {
        let mut handle = memory();
        handle
            .execute("CREATE TABLE `players` (`name` TEXT, `score` INTEGER, `ratio` REAL)")
            .unwrap();
        let inserted = handle
            .execute("INSERT INTO `players` (`name`, `score`, `ratio`) VALUES ('ann', 7, 0.5), ('bob', NULL, 1.5)")
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = handle.query("SELECT * FROM `players` ORDER BY `name`").unwrap();
        assert_eq!(rows.columns, vec!["name", "score", "ratio"]);
        assert_eq!(
            rows.rows[0],
            vec![SqlValue::Text("ann".into()), SqlValue::Integer(7), SqlValue::Real(0.5)]
        );
        assert_eq!(rows.rows[1][1], SqlValue::Null);
    }

    #[test]
    fn test_table_exists_on_sqlite() {
        let mut handle = memory();
        assert!(handle.backend_name().eq_ignore_ascii_case("sqlite"));
        assert!(!handle.table_exists("missing").unwrap());
        handle.execute("CREATE TABLE `present` (`id` INTEGER)").unwrap();
        assert!(handle.table_exists("present").unwrap());
    }

    #[test]
    fn test_closed_handle_reports_not_connected() {
        let mut handle = memory();
        handle.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.query("SELECT 1"), Err(AsyncSqlError::NotConnected));
        assert!(handle.close().is_ok());
    }

    #[test]
    fn test_bad_sql_is_task_execution_error() {
        let mut handle = memory();
        let err = handle.execute("NOT SQL AT ALL").unwrap_err();
        assert!(matches!(err, AsyncSqlError::TaskExecution(_)));
    }
}
