//! # Row Cache
//!
//! Write-through, TTL-based cache of backing-table rows.
//!
//! - [`CachedTable`] - keyed cache over one [`Table`](crate::database::Table)
//! - [`CachedRow`] - one cached record with its refresh timestamp
//! - [`ExpirationAction`] - refresh or evict stale rows
//! - [`ColumnResolver`] / [`SchemaResolver`] - column encoding
//! - [`CacheManager`] - per-connection registry with bulk upload/download
//! - [`KvStorage`] and [`CooldownStorage`] - two-column specializations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use asyncsql_core::cache::{CachedTable, ColumnKind, ExpirationAction, SchemaResolver};
//! use asyncsql_core::database::Connection;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example(connection: &Connection) -> asyncsql_core::error::Result<()> {
//! let table = connection.create_table("players", "`name` TEXT, `level` INTEGER")?;
//! let resolver = SchemaResolver::new()
//!     .column("name", ColumnKind::Text)
//!     .column("level", ColumnKind::Integer);
//! let players = CachedTable::new(
//!     table,
//!     "name",
//!     Arc::new(resolver),
//!     ExpirationAction::Download,
//!     Some(Duration::from_secs(30)),
//! );
//!
//! players.set("ann", HashMap::from([("level".to_string(), 3.into())]))?;
//! let level = players.get("ann")?.and_then(|row| row.get("level").cloned());
//! # Ok(())
//! # }
//! ```

pub mod cached_table;
pub mod cooldown;
pub mod expiration;
pub mod kv;
pub mod manager;
pub mod resolver;
pub mod row;

pub use cached_table::CachedTable;
pub use cooldown::CooldownStorage;
pub use expiration::ExpirationAction;
pub use kv::KvStorage;
pub use manager::CacheManager;
pub use resolver::{quote_literal, ColumnKind, ColumnResolver, ColumnValue, SchemaResolver};
pub use row::CachedRow;
