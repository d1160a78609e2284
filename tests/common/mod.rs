//! Shared setup for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use asyncsql_core::config::{AsyncSqlConfig, SchedulerConfig};
use asyncsql_core::database::{Connection, ConnectionInfo, SqlxConnector};
use asyncsql_core::scheduler::Scheduler;
use asyncsql_core::test_helpers::MockConnector;

pub fn started_scheduler() -> Scheduler {
    Scheduler::started(SchedulerConfig::default()).expect("scheduler should start")
}

pub fn mock_connection(scheduler: &Scheduler, config: &AsyncSqlConfig) -> (Connection, MockConnector) {
    let mock = MockConnector::new();
    let connection = Connection::connect_with(
        ConnectionInfo::from_url("mock://"),
        config,
        scheduler,
        Arc::new(mock.clone()),
    )
    .expect("mock connection");
    (connection, mock)
}

/// A fresh private in-memory SQLite database
pub fn sqlite_connection(scheduler: &Scheduler) -> Connection {
    Connection::connect_with(
        ConnectionInfo::from_url("sqlite::memory:"),
        &AsyncSqlConfig::for_test(),
        scheduler,
        Arc::new(SqlxConnector::new()),
    )
    .expect("in-memory sqlite connection")
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
