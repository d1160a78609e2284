//! In-memory [`Connector`] for exercising connections without a database.
//!
//! [`MockConnector`] hands out [`MockHandle`]s that record every statement,
//! answer queries from canned [`RowSet`]s and fail on request. Clones share
//! state, so a test keeps one clone for assertions and passes another to
//! [`Connection::connect_with`](crate::database::Connection::connect_with).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::database::{ConnectionInfo, Connector, DatabaseHandle, RowSet};
use crate::error::{AsyncSqlError, Result};

#[derive(Default)]
struct MockState {
    responses: HashMap<String, RowSet>,
    failing: HashSet<String>,
    tables: HashSet<String>,
    statements: Vec<String>,
    connect_attempts: u32,
    connect_failures: u32,
    connect_delay: Option<Duration>,
    live: Vec<Arc<AtomicBool>>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `rows`
    pub fn respond_to(&self, sql: impl Into<String>, rows: RowSet) {
        self.state.lock().responses.insert(sql.into(), rows);
    }

    /// Make `sql` fail with a task execution error
    pub fn fail_statement(&self, sql: impl Into<String>) {
        self.state.lock().failing.insert(sql.into());
    }

    /// Refuse the next `count` connect calls. `u32::MAX` refuses forever.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Sleep this long inside every connect call
    pub fn delay_connects(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Report `name` from `table_exists`
    pub fn add_table(&self, name: impl Into<String>) {
        self.state.lock().tables.insert(name.into().to_lowercase());
    }

    /// Close every handle handed out so far, as a dropped server link would
    pub fn sever(&self) {
        for closed in self.state.lock().live.drain(..) {
            closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Every statement run through any handle, in order
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn DatabaseHandle>> {
        let delay = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if state.connect_failures > 0 {
            if state.connect_failures != u32::MAX {
                state.connect_failures -= 1;
            }
            return Err(AsyncSqlError::ConnectionEstablishment {
                attempts: 1,
                reason: format!("mock refused {}", info.redacted_url()),
            });
        }

        let closed = Arc::new(AtomicBool::new(false));
        state.live.push(closed.clone());
        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            closed,
        }))
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockConnector")
            .field("connect_attempts", &state.connect_attempts)
            .field("statements", &state.statements.len())
            .finish()
    }
}

pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    closed: Arc<AtomicBool>,
}

impl MockHandle {
    fn record(&self, sql: &str) -> Result<()> {
        if self.is_closed() {
            return Err(AsyncSqlError::NotConnected);
        }
        let mut state = self.state.lock();
        state.statements.push(sql.to_string());
        if state.failing.contains(sql) {
            return Err(AsyncSqlError::task(format!("mock failure for `{sql}`")));
        }
        Ok(())
    }
}

impl DatabaseHandle for MockHandle {
    fn query(&mut self, sql: &str) -> Result<RowSet> {
        self.record(sql)?;
        Ok(self
            .state
            .lock()
            .responses
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        if let Some(name) = created_table(sql) {
            self.state.lock().tables.insert(name.to_lowercase());
        }
        Ok(1)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn table_exists(&mut self, name: &str) -> Result<bool> {
        if self.is_closed() {
            return Err(AsyncSqlError::NotConnected);
        }
        Ok(self.state.lock().tables.contains(&name.to_lowercase()))
    }
}

/// Table name of a `CREATE TABLE [IF NOT EXISTS] `name` ...` statement
fn created_table(sql: &str) -> Option<&str> {
    let rest = sql.strip_prefix("CREATE TABLE ")?;
    let rest = rest.strip_prefix("IF NOT EXISTS ").unwrap_or(rest);
    let rest = rest.strip_prefix('`')?;
    rest.split('`').next()
}
