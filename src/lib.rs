#![allow(clippy::doc_markdown)] // Allow technical terms like MySQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # AsyncSQL Core
//!
//! Asynchronous SQL access driven by a single background scheduler thread,
//! with a write-through row cache on top.
//!
//! ## Overview
//!
//! Callers never talk to the database directly. Every statement becomes a
//! [`Task`](task::Task) pushed onto a [`Connection`]'s queue; the
//! [`Scheduler`] thread drains the queue in submission order and resolves a
//! future per task. Failures are latched per task and replayed to every
//! subscriber, including ones that register late.
//!
//! ## Module Organization
//!
//! - [`scheduler`] - background thread running named work items
//! - [`promise`] - value, completion and task-bound futures
//! - [`task`] - queued database actions and their error latch
//! - [`database`] - connection lifecycle, table builder, sqlx driver
//! - [`cache`] - TTL row cache, key/value and cooldown storage
//! - [`config`] - configuration loading
//! - [`error`] - crate error type
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asyncsql_core::{AsyncSqlConfig, Connection, ConnectionInfo, Scheduler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AsyncSqlConfig::default();
//! let scheduler = Scheduler::started(config.scheduler.clone())?;
//! let connection = Connection::connect(ConnectionInfo::from_env(), &config, &scheduler)?;
//!
//! let rows = connection.query("SELECT 1 AS one").wait()?;
//! println!("{:?}", rows.first().and_then(|row| row.get("one").cloned()));
//!
//! connection.disconnect().wait()?;
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (SQLite in memory)
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod promise;
pub mod scheduler;
pub mod task;
pub mod test_helpers;

pub use cache::{
    CacheManager, CachedRow, CachedTable, ColumnKind, ColumnResolver, ColumnValue,
    CooldownStorage, ExpirationAction, KvStorage, SchemaResolver,
};
pub use config::AsyncSqlConfig;
pub use database::{Connection, ConnectionInfo, RowSet, SqlValue, Table};
pub use error::{AsyncSqlError, Result};
pub use promise::{CompletionFuture, TaskFuture, ValueFuture};
pub use scheduler::Scheduler;
pub use task::{ErrorLatch, Task};
