//! # Connection
//!
//! Owns one live [`DatabaseHandle`] and a FIFO queue of [`Task`]s. A single
//! scheduler work item named after the connection drains the queue, so tasks
//! for one connection run strictly in submission order and never concurrently.
//!
//! Establishment is bounded: `max_attempts` connect jobs are scheduled, each
//! waited on for `attempt_timeout`. When reconnect is enabled, a recoverable
//! task failure triggers a reconnect with exponential backoff followed by one
//! resubmission of the same action, limited by [`RetryConfig`].
//!
//! Every blocking call here (`connect`, `table`, `create_table` and the
//! `wait*` methods of returned futures) must be made from outside the
//! scheduler thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{Connector, DatabaseHandle, RowSet};
use super::info::ConnectionInfo;
use super::sqlx_driver::SqlxConnector;
use super::table::Table;
use crate::cache::CacheManager;
use crate::config::{AsyncSqlConfig, ConnectionConfig, RetryConfig};
use crate::error::{AsyncSqlError, Result};
use crate::logging::{log_connection_event, log_error};
use crate::promise::{CompletionFuture, TaskFuture, ValueFuture};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskAction};

/// Handle to one logical database connection. Clones share the same queue.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: Uuid,
    work_item: String,
    info: ConnectionInfo,
    connection_config: ConnectionConfig,
    retry: RetryConfig,
    scheduler: Scheduler,
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Box<dyn DatabaseHandle>>>,
    queue: SegQueue<Task>,
    /// Bumped per connect attempt; a late handle from an abandoned attempt is closed.
    generation: AtomicU64,
    disconnected: AtomicBool,
    /// Set by the close task itself; anything queued afterwards is failed.
    closed: AtomicBool,
    cache_manager: CacheManager,
}

impl Connection {
    /// Connect through sqlx, blocking until the handle is open or every attempt failed.
    pub fn connect(info: ConnectionInfo, config: &AsyncSqlConfig, scheduler: &Scheduler) -> Result<Self> {
        Self::connect_with(info, config, scheduler, Arc::new(SqlxConnector::new()))
    }

    /// Connect through a custom [`Connector`]
    pub fn connect_with(
        info: ConnectionInfo,
        config: &AsyncSqlConfig,
        scheduler: &Scheduler,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let inner = Arc::new(ConnectionInner {
            id,
            work_item: format!("connection-{id}"),
            info,
            connection_config: config.connection.clone(),
            retry: config.retry.clone(),
            scheduler: scheduler.clone(),
            connector,
            handle: Mutex::new(None),
            queue: SegQueue::new(),
            generation: AtomicU64::new(0),
            disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cache_manager: CacheManager::new(),
        });

        inner.establish()?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// Name of the scheduler work item that drains this connection
    pub fn work_item_name(&self) -> &str {
        &self.inner.work_item
    }

    pub fn is_reconnect_enabled(&self) -> bool {
        self.inner.connection_config.reconnect
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.inner.cache_manager
    }

    /// Tasks queued but not yet picked up by the drain
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue `action` against the live handle.
    ///
    /// With reconnect enabled, a recoverable failure schedules a reconnect and
    /// resubmits the action; the returned task still reports the failure.
    pub fn submit(
        &self,
        action: impl Fn(&mut dyn DatabaseHandle) -> Result<()> + Send + Sync + 'static,
    ) -> Task {
        self.inner
            .enqueue(Task::new(action), self.inner.retry.max_resubmits)
    }

    /// Run a row-returning statement
    pub fn query(&self, sql: impl Into<String>) -> TaskFuture<RowSet> {
        let sql = sql.into();
        let value = ValueFuture::new();
        let sink = value.clone();
        let task = self.submit(move |handle| {
            let rows = handle.query(&sql)?;
            sink.resolve(rows);
            Ok(())
        });
        TaskFuture::bind(value, task)
    }

    /// Run a statement for its side effect
    pub fn update(&self, sql: impl Into<String>) -> CompletionFuture {
        let sql = sql.into();
        let done = CompletionFuture::new();
        let signal = done.clone();
        let task = self.submit(move |handle| {
            handle.execute(&sql)?;
            signal.complete();
            Ok(())
        });
        let failed = done.clone();
        task.error_latch().subscribe(move |error| {
            failed.fail(error.clone());
        });
        done
    }

    /// `true` while the handle is open. Resolves `false` when the check itself fails.
    pub fn is_connected(&self) -> ValueFuture<bool> {
        let value = ValueFuture::new();
        let sink = value.clone();
        let task = self.inner.enqueue(
            Task::new(move |handle| {
                sink.resolve(!handle.is_closed());
                Ok(())
            }),
            0,
        );
        let fallback = value.clone();
        task.error_latch().subscribe(move |_| {
            fallback.resolve(false);
        });
        value
    }

    /// Close the handle and deregister the drain work item once queued tasks ahead
    /// of the close have run. Also drops every cached table registration.
    pub fn disconnect(&self) -> CompletionFuture {
        let done = CompletionFuture::new();
        let signal = done.clone();
        let weak = Arc::downgrade(&self.inner);

        let task = self.inner.enqueue(
            Task::new(move |handle| {
                let result = handle.close();
                if let Some(inner) = weak.upgrade() {
                    inner.closed.store(true, Ordering::SeqCst);
                    inner.scheduler.remove_work_item(&inner.work_item);
                    log_connection_event(&inner.id.to_string(), "disconnected", None, None);
                }
                result?;
                signal.complete();
                Ok(())
            }),
            0,
        );
        self.inner.disconnected.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        let failed = done.clone();
        task.error_latch().subscribe(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.closed.store(true, Ordering::SeqCst);
                inner.scheduler.remove_work_item(&inner.work_item);
                inner.fail_orphans();
            }
            failed.fail(error.clone());
        });

        self.inner.cache_manager.clear();
        done
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::SeqCst)
    }

    pub fn exists_table(&self, name: impl Into<String>) -> ValueFuture<bool> {
        let name = name.into();
        let value = ValueFuture::new();
        let sink = value.clone();
        let task = self.submit(move |handle| {
            let exists = handle.table_exists(&name)?;
            sink.resolve(exists);
            Ok(())
        });
        let failed = value.clone();
        task.error_latch().subscribe(move |error| {
            failed.fail(error.clone());
        });
        value
    }

    /// The table named `name`, or `None` when it does not exist. Blocks.
    pub fn table(&self, name: &str) -> Result<Option<Table>> {
        if self.exists_table(name).wait()? {
            Ok(Some(Table::new(name, self.clone())))
        } else {
            Ok(None)
        }
    }

    /// Create `name` with the given column definitions unless it exists. Blocks.
    ///
    /// `columns` is the text between the parentheses, e.g. `` `UUID` varchar(36), `Cooldown` BIGINT ``.
    pub fn create_table(&self, name: &str, columns: &str) -> Result<Table> {
        if let Some(table) = self.table(name)? {
            return Ok(table);
        }
        let table = Table::new(name, self.clone());
        table.create_if_missing(columns).wait()?;
        debug!(connection_id = %self.inner.id, table = %name, "Table created");
        Ok(table)
    }

    pub(crate) fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("info", &self.inner.info)
            .field("reconnect", &self.inner.connection_config.reconnect)
            .field("pending_tasks", &self.inner.queue.len())
            .finish()
    }
}

impl ConnectionInner {
    fn establish(self: &Arc<Self>) -> Result<()> {
        let id = self.id.to_string();
        let attempts = self.connection_config.max_attempts;
        let timeout = self.connection_config.attempt_timeout();
        let mut reason = String::from("no attempt was made");

        for attempt in 1..=attempts {
            log_connection_event(&id, "connect_attempt", Some(attempt), None);
            match self.attempt_connect(timeout) {
                Ok(()) => {
                    info!(
                        connection_id = %id,
                        attempt,
                        url = %self.info.redacted_url(),
                        "Connection established"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(connection_id = %id, attempt, error = %e, "Connection attempt failed");
                    reason = e;
                }
            }
        }

        log_error("connection", "establish", &reason, Some(&id));
        Err(AsyncSqlError::ConnectionEstablishment { attempts, reason })
    }

    fn attempt_connect(self: &Arc<Self>, timeout: std::time::Duration) -> std::result::Result<(), String> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let done = CompletionFuture::new();
        let signal = done.clone();
        let weak = Arc::downgrade(self);

        self.scheduler
            .run_once(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.connector.connect(&inner.info) {
                    Ok(mut handle) => {
                        if inner.generation.load(Ordering::SeqCst) != generation {
                            debug!(connection_id = %inner.id, "Closing handle from abandoned attempt");
                            let _ = handle.close();
                            return;
                        }
                        match inner.install(handle) {
                            Ok(()) => {
                                signal.complete();
                            }
                            Err(e) => {
                                signal.fail(e);
                            }
                        }
                    }
                    Err(e) => {
                        signal.fail(e);
                    }
                }
            })
            .map_err(|e| e.to_string())?;

        match done.wait_for(timeout) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                Err(format!("attempt timed out after {} ms", timeout.as_millis()))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Swap in a new handle and (re)register the drain work item.
    fn install(self: &Arc<Self>, handle: Box<dyn DatabaseHandle>) -> Result<()> {
        if let Some(mut previous) = self.handle.lock().replace(handle) {
            if !previous.is_closed() {
                if let Err(e) = previous.close() {
                    warn!(connection_id = %self.id, error = %e, "Failed to close replaced handle");
                }
            }
        }

        let weak: Weak<ConnectionInner> = Arc::downgrade(self);
        self.scheduler.replace_work_item(self.work_item.clone(), move || {
            if let Some(inner) = weak.upgrade() {
                inner.drain();
            }
        })
    }

    /// Drain body. Runs on the scheduler thread only.
    fn drain(&self) {
        while let Some(task) = self.queue.pop() {
            let outcome = {
                let mut slot = self.handle.lock();
                let outcome = match slot.as_mut() {
                    Some(handle) if !handle.is_closed() => {
                        catch_unwind(AssertUnwindSafe(|| task.execute(&mut **handle)))
                            .unwrap_or_else(|_| Err(AsyncSqlError::task("task panicked")))
                    }
                    _ => Err(AsyncSqlError::NotConnected),
                };
                if slot.as_ref().is_some_and(|h| h.is_closed()) {
                    *slot = None;
                }
                outcome
            };

            if let Err(error) = outcome {
                debug!(
                    connection_id = %self.id,
                    task_id = %task.id(),
                    error = %error,
                    "Task failed"
                );
                task.error_latch().record(error);
            }
        }
    }

    fn enqueue(self: &Arc<Self>, task: Task, resubmits_left: u32) -> Task {
        if self.disconnected.load(Ordering::SeqCst) {
            task.error_latch().record(AsyncSqlError::NotConnected);
            return task;
        }

        if self.connection_config.reconnect && resubmits_left > 0 {
            let weak = Arc::downgrade(self);
            let action = task.action();
            task.error_latch().set_pre_throw_hook(move |error| {
                if !error.is_recoverable() {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.recover(action, resubmits_left - 1, 0);
                }
            });
        }

        self.queue.push(task.clone());
        self.fail_orphans();
        task
    }

    /// Tasks pushed after the close task ran would never be drained.
    fn fail_orphans(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            return;
        }
        while let Some(task) = self.queue.pop() {
            task.error_latch().record(AsyncSqlError::NotConnected);
        }
    }

    /// Reconnect after a backoff, then resubmit `action`. Runs on the scheduler thread.
    fn recover(self: &Arc<Self>, action: TaskAction, resubmits_left: u32, attempt: u32) {
        let delay = self.retry.backoff_for(attempt);
        let id = self.id.to_string();
        log_connection_event(&id, "reconnect_scheduled", Some(attempt + 1), None);

        let weak = Arc::downgrade(self);
        let scheduled = self.scheduler.run_after(delay, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disconnected.load(Ordering::SeqCst) {
                return;
            }

            let reconnected = inner
                .connector
                .connect(&inner.info)
                .and_then(|handle| {
                    inner.generation.fetch_add(1, Ordering::SeqCst);
                    inner.install(handle)
                });

            match reconnected {
                Ok(()) => {
                    log_connection_event(&inner.id.to_string(), "reconnected", Some(attempt + 1), None);
                    inner.enqueue(Task::from_action(action), resubmits_left);
                }
                Err(e) if attempt + 1 < inner.retry.reconnect_attempts => {
                    warn!(connection_id = %inner.id, attempt = attempt + 1, error = %e, "Reconnect failed, retrying");
                    inner.recover(action, resubmits_left, attempt + 1);
                }
                Err(e) => {
                    log_error(
                        "connection",
                        "reconnect",
                        &e.to_string(),
                        Some("giving up, resubmission dropped"),
                    );
                }
            }
        });

        if let Err(e) = scheduled {
            log_error("connection", "reconnect", &e.to_string(), Some(&id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::database::SqlValue;
    use crate::test_helpers::MockConnector;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        Scheduler::started(SchedulerConfig::default()).expect("scheduler")
    }

    #[test]
    fn test_query_resolves_canned_rows() {
        let scheduler = scheduler();
        let mock = MockConnector::new();
        mock.respond_to(
            "SELECT 1",
            RowSet::new(vec!["one".into()], vec![vec![SqlValue::Integer(1)]]),
        );
        let connection = Connection::connect_with(
            ConnectionInfo::from_url("mock://"),
            &AsyncSqlConfig::for_test(),
            &scheduler,
            Arc::new(mock.clone()),
        )
        .unwrap();

        let rows = connection.query("SELECT 1").wait().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(mock.statements(), vec!["SELECT 1".to_string()]);
        scheduler.stop();
    }

    #[test]
    fn test_failed_task_does_not_block_siblings() {
        let scheduler = scheduler();
        let mock = MockConnector::new();
        mock.fail_statement("BROKEN");
        let connection = Connection::connect_with(
            ConnectionInfo::from_url("mock://"),
            &AsyncSqlConfig::for_test(),
            &scheduler,
            Arc::new(mock.clone()),
        )
        .unwrap();

        let broken = connection.update("BROKEN");
        let fine = connection.update("UPDATE ok");
        assert!(matches!(broken.wait(), Err(AsyncSqlError::TaskExecution(_))));
        assert_eq!(fine.wait(), Ok(()));
        scheduler.stop();
    }

    #[test]
    fn test_is_connected_reports_open_handle() {
        let scheduler = scheduler();
        let connection = Connection::connect_with(
            ConnectionInfo::from_url("mock://"),
            &AsyncSqlConfig::for_test(),
            &scheduler,
            Arc::new(MockConnector::new()),
        )
        .unwrap();

        assert!(connection.is_connected().wait_for_or(Duration::from_secs(2), false));
        connection.disconnect().wait().unwrap();
        assert!(!connection.is_connected().wait_for_or(Duration::from_secs(2), true));
        scheduler.stop();
    }

    #[test]
    fn test_task_queued_behind_close_is_failed() {
        let scheduler = scheduler();
        let connection = Connection::connect_with(
            ConnectionInfo::from_url("mock://"),
            &AsyncSqlConfig::for_test(),
            &scheduler,
            Arc::new(MockConnector::new()),
        )
        .unwrap();
        connection.disconnect().wait().unwrap();

        // A submitter that checked the flag just before disconnect pushes after the drain is gone
        connection.inner.disconnected.store(false, Ordering::SeqCst);
        let late = connection.update("UPDATE late");
        assert_eq!(
            late.wait_for(Duration::from_secs(2)),
            Err(AsyncSqlError::NotConnected)
        );
        assert_eq!(connection.pending_tasks(), 0);
        scheduler.stop();
    }
}
