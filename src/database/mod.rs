//! # Database Layer
//!
//! Everything between a caller and the blocking driver:
//!
//! - [`handle`] - the [`DatabaseHandle`]/[`Connector`] seam and owned [`RowSet`]s
//! - [`info`] - endpoint and credentials
//! - [`sqlx_driver`] - the sqlx-backed connector used in production
//! - [`connection`] - task queue, drain work item, bounded (re)connection
//! - [`table`] - narrow SQL builder consumed by the cache
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use asyncsql_core::config::AsyncSqlConfig;
//! use asyncsql_core::database::{Connection, ConnectionInfo};
//! use asyncsql_core::scheduler::Scheduler;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AsyncSqlConfig::default();
//! let scheduler = Scheduler::started(config.scheduler.clone())?;
//! let connection = Connection::connect(
//!     ConnectionInfo::new("localhost", 3306, "game", "svc", "secret"),
//!     &config,
//!     &scheduler,
//! )?;
//!
//! connection.update("DELETE FROM `sessions` WHERE `expired` = 1");
//! let rows = connection.query("SELECT * FROM `players` LIMIT 10").wait()?;
//! println!("{} players", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod handle;
pub mod info;
pub mod sqlx_driver;
pub mod table;

pub use connection::Connection;
pub use handle::{Connector, DatabaseHandle, Row, RowSet, SqlValue};
pub use info::ConnectionInfo;
pub use sqlx_driver::{SqlxConnector, SqlxHandle};
pub use table::{ColumnLiterals, Table};
