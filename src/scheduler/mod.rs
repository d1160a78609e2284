//! # Scheduler
//!
//! One background thread that executes a registry of named work items in a
//! loop. Every tick runs each registered action once, in registration order,
//! then applies deferred removals. Removal never happens mid-tick, and an item
//! that was registered during a tick is guaranteed one execution before its
//! removal takes effect.
//!
//! Actions run outside the registry lock, so an action may add, replace or
//! remove work items (including itself). A panicking action is logged and
//! keeps its registration.
//!
//! The loop does not sleep unless [`SchedulerConfig::idle_sleep_us`] is set;
//! it yields between ticks.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{AsyncSqlError, Result};
use crate::promise::ValueFuture;

/// Zero-argument action executed once per tick
pub type WorkAction = Arc<dyn Fn() + Send + Sync>;

const CONDITION_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct WorkItem {
    name: Arc<str>,
    action: WorkAction,
    /// Set once the item took part in a tick; removals wait for it.
    executed: bool,
}

#[derive(Default)]
struct Registry {
    items: Vec<WorkItem>,
    pending_removals: Vec<Arc<str>>,
}

impl Registry {
    fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| &*item.name == name)
    }

    fn request_removal(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                if !self.pending_removals.iter().any(|n| &**n == name) {
                    let key = Arc::clone(&self.items[index].name);
                    self.pending_removals.push(key);
                }
                true
            }
            None => false,
        }
    }

    fn apply_removals(&mut self) -> usize {
        let mut removed = 0;
        let items = &mut self.items;
        self.pending_removals.retain(|name| match items.iter().position(|i| i.name == *name) {
            Some(index) if items[index].executed => {
                items.remove(index);
                removed += 1;
                false
            }
            Some(_) => true,
            None => false,
        });
        removed
    }
}

struct SchedulerShared {
    config: SchedulerConfig,
    registry: Mutex<Registry>,
    running: AtomicBool,
    /// Bumped by every `start`, so a stale loop from a previous run exits.
    epoch: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    ticks: AtomicU64,
}

/// Handle to the background scheduler. Clones share the same thread and registry.
///
/// # Examples
///
/// ```rust
/// use asyncsql_core::config::SchedulerConfig;
/// use asyncsql_core::scheduler::Scheduler;
/// use std::sync::mpsc;
///
/// let scheduler = Scheduler::new(SchedulerConfig::default());
/// scheduler.start().unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// scheduler.run_once(move || tx.send("ran").unwrap()).unwrap();
/// assert_eq!(rx.recv().unwrap(), "ran");
/// scheduler.stop();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                registry: Mutex::new(Registry::default()),
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                worker: Mutex::new(None),
                ticks: AtomicU64::new(0),
            }),
        }
    }

    /// Construct and start in one step
    pub fn started(config: SchedulerConfig) -> Result<Self> {
        let scheduler = Self::new(config);
        scheduler.start()?;
        Ok(scheduler)
    }

    /// Spawn the worker thread. A no-op when it is already running.
    ///
    /// After a [`Scheduler::stop`], waits for the previous worker to finish its
    /// tick so that two loops never run at once.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running, start ignored");
            return Ok(());
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.shared.worker.lock().take();
        if let Some(previous) = previous {
            if previous.thread().id() == std::thread::current().id() {
                warn!("Scheduler restarted from its own thread; the old loop exits after this tick");
            } else if previous.join().is_err() {
                warn!("Previous scheduler worker panicked");
            }
        }
        let weak = Arc::downgrade(&self.shared);
        let thread_name = self.shared.config.thread_name.clone();

        let spawned = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_loop(weak, epoch));

        match spawned {
            Ok(handle) => {
                *self.shared.worker.lock() = Some(handle);
                info!(thread = %thread_name, "Scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                error!(thread = %thread_name, error = %e, "Failed to spawn scheduler thread");
                Err(AsyncSqlError::SchedulerSpawn(e.to_string()))
            }
        }
    }

    /// Ask the loop to exit after the current tick. Does not wait for it.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!(thread = %self.shared.config.thread_name, "Scheduler stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Completed loop iterations since construction
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Register `action` under `name`.
    ///
    /// Fails with [`AsyncSqlError::DuplicateWorkItem`] when the name is taken
    /// (including items whose removal is still pending) and with
    /// [`AsyncSqlError::SchedulerNotRunning`] before [`Scheduler::start`].
    pub fn add_work_item(
        &self,
        name: impl Into<String>,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Result<()> {
        self.insert(name.into(), Arc::new(action), false)
    }

    /// Schedule removal at the next tick boundary. Returns whether `name` was registered.
    pub fn remove_work_item(&self, name: &str) -> bool {
        let found = self.shared.registry.lock().request_removal(name);
        if found {
            debug!(work_item = %name, "Work item removal scheduled");
        }
        found
    }

    /// Registered, including items whose removal is still pending
    pub fn has_work_item(&self, name: &str) -> bool {
        self.shared.registry.lock().position(name).is_some()
    }

    pub fn work_item_count(&self) -> usize {
        self.shared.registry.lock().items.len()
    }

    /// Swap the action registered under `name`, or register it when absent.
    /// A pending removal of `name` is cancelled.
    pub fn replace_work_item(
        &self,
        name: impl Into<String>,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Result<()> {
        self.ensure_running()?;
        let name = name.into();
        let action: WorkAction = Arc::new(action);

        let mut registry = self.shared.registry.lock();
        registry.pending_removals.retain(|n| **n != *name);
        match registry.position(&name) {
            Some(index) => {
                registry.items[index].action = action;
                debug!(work_item = %name, "Work item replaced");
            }
            None => {
                registry.items.push(WorkItem {
                    name: Arc::from(name.as_str()),
                    action,
                    executed: false,
                });
                debug!(work_item = %name, "Work item registered");
            }
        }
        Ok(())
    }

    /// Run `action` once on the scheduler thread.
    pub fn run_once(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        let cell = Mutex::new(Some(action));
        self.insert(
            format!("once-{}", Uuid::new_v4()),
            Arc::new(move || {
                if let Some(action) = cell.lock().take() {
                    action();
                }
            }),
            true,
        )
    }

    /// Register `action` to fire every `period`, first at registration + `period`.
    ///
    /// Fires when the current time has reached the next fire time, so a slow
    /// tick delays a firing but never drops it.
    pub fn run_repeating(
        &self,
        name: impl Into<String>,
        action: impl Fn() + Send + Sync + 'static,
        period: Duration,
    ) -> Result<()> {
        let next_fire = Mutex::new(Instant::now() + period);
        self.add_work_item(name, move || {
            let now = Instant::now();
            {
                let mut next = next_fire.lock();
                if now < *next {
                    return;
                }
                *next = now + period;
            }
            action();
        })
    }

    /// Run `action` once on the scheduler thread after at least `delay`.
    pub fn run_after(&self, delay: Duration, action: impl FnOnce() + Send + 'static) -> Result<()> {
        let due = Instant::now() + delay;
        let name: Arc<str> = Arc::from(format!("after-{}", Uuid::new_v4()));
        let cell = Mutex::new(Some(action));
        let registry = Arc::downgrade(&self.shared);
        let own_name = Arc::clone(&name);

        self.insert(
            name.to_string(),
            Arc::new(move || {
                if Instant::now() < due {
                    return;
                }
                if let Some(action) = cell.lock().take() {
                    if let Some(shared) = registry.upgrade() {
                        shared.registry.lock().request_removal(&own_name);
                    }
                    action();
                }
            }),
            false,
        )
    }

    /// Resolve the returned future with `value` once `predicate` holds.
    /// The predicate is checked on the scheduler thread every 10 ms.
    pub fn await_condition<T: Clone + Send + 'static>(
        &self,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
        value: T,
    ) -> Result<ValueFuture<T>> {
        let future = ValueFuture::new();
        let sink = future.clone();
        let name = format!("await-{}", Uuid::new_v4());
        let own_name = name.clone();
        let registry = Arc::downgrade(&self.shared);
        let pending = Mutex::new(Some(value));

        self.run_repeating(
            name,
            move || {
                if !predicate() {
                    return;
                }
                let Some(value) = pending.lock().take() else {
                    return;
                };
                if let Some(shared) = registry.upgrade() {
                    shared.registry.lock().request_removal(&own_name);
                }
                sink.resolve(value);
            },
            CONDITION_POLL_INTERVAL,
        )?;
        Ok(future)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(AsyncSqlError::SchedulerNotRunning)
        }
    }

    fn insert(&self, name: String, action: WorkAction, remove_after_run: bool) -> Result<()> {
        self.ensure_running()?;
        let mut registry = self.shared.registry.lock();
        if registry.position(&name).is_some() {
            return Err(AsyncSqlError::DuplicateWorkItem(name));
        }
        registry.items.push(WorkItem {
            name: Arc::from(name.as_str()),
            action,
            executed: false,
        });
        if remove_after_run {
            registry.request_removal(&name);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("thread_name", &self.shared.config.thread_name)
            .field("running", &self.is_running())
            .field("work_items", &self.work_item_count())
            .finish()
    }
}

fn run_loop(shared: Weak<SchedulerShared>, epoch: u64) {
    loop {
        let Some(shared) = shared.upgrade() else {
            debug!("Scheduler dropped, worker thread exiting");
            return;
        };
        if !shared.running.load(Ordering::SeqCst) || shared.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, "Scheduler worker thread exiting");
            return;
        }

        tick(&shared);
        let idle = shared.config.idle_sleep();
        drop(shared);

        match idle {
            Some(pause) => std::thread::sleep(pause),
            None => std::thread::yield_now(),
        }
    }
}

fn tick(shared: &SchedulerShared) {
    let batch: Vec<(Arc<str>, WorkAction)> = {
        let mut registry = shared.registry.lock();
        registry
            .items
            .iter_mut()
            .map(|item| {
                item.executed = true;
                (Arc::clone(&item.name), Arc::clone(&item.action))
            })
            .collect()
    };

    for (name, action) in batch {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| action())) {
            warn!(
                work_item = %name,
                panic = %panic_message(panic.as_ref()),
                "Work item panicked"
            );
        }
    }

    let removed = shared.registry.lock().apply_removals();
    if removed > 0 {
        debug!(removed, "Applied deferred work item removals");
    }
    shared.ticks.fetch_add(1, Ordering::SeqCst);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn started() -> Scheduler {
        Scheduler::started(SchedulerConfig {
            thread_name: "asyncsql-scheduler-test".to_string(),
            idle_sleep_us: 0,
        })
        .expect("scheduler should start")
    }

    #[test]
    fn test_add_requires_running_scheduler() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        assert_eq!(
            scheduler.add_work_item("item", || {}),
            Err(AsyncSqlError::SchedulerNotRunning)
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let scheduler = started();
        scheduler.add_work_item("dup", || {}).unwrap();
        assert_eq!(
            scheduler.add_work_item("dup", || {}),
            Err(AsyncSqlError::DuplicateWorkItem("dup".into()))
        );
        scheduler.stop();
    }

    #[test]
    fn test_start_twice_is_noop() {
        let scheduler = started();
        assert!(scheduler.start().is_ok());
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_removal_is_deferred_but_applied() {
        let scheduler = started();
        scheduler.add_work_item("temp", || {}).unwrap();
        assert!(scheduler.remove_work_item("temp"));
        assert!(!scheduler.remove_work_item("missing"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.has_work_item("temp") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!scheduler.has_work_item("temp"));
        scheduler.stop();
    }

    #[test]
    fn test_panicking_item_does_not_kill_loop() {
        let scheduler = started();
        scheduler.run_once(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler.run_once(move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        scheduler.stop();
    }

    #[test]
    fn test_replace_cancels_pending_removal() {
        let scheduler = started();
        scheduler.add_work_item("drain", || {}).unwrap();
        scheduler.remove_work_item("drain");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler
            .replace_work_item("drain", move || {
                let _ = tx.lock().send(());
            })
            .unwrap();

        for _ in 0..3 {
            assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        }
        assert!(scheduler.has_work_item("drain"));
        scheduler.stop();
    }

    #[test]
    fn test_run_after_waits_for_delay() {
        let scheduler = started();
        let (tx, rx) = mpsc::channel();
        let submitted = Instant::now();
        scheduler
            .run_after(Duration::from_millis(40), move || tx.send(Instant::now()).unwrap())
            .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(submitted) >= Duration::from_millis(40));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        scheduler.stop();
    }

    #[test]
    fn test_await_condition_resolves_once() {
        let scheduler = started();
        let flag = Arc::new(AtomicBool::new(false));
        let watched = Arc::clone(&flag);
        let future = scheduler
            .await_condition(move || watched.load(Ordering::SeqCst), "ready")
            .unwrap();

        assert_eq!(future.wait_for(Duration::from_millis(30)), Ok(None));
        flag.store(true, Ordering::SeqCst);
        assert_eq!(future.wait_for(Duration::from_secs(2)), Ok(Some("ready")));
        scheduler.stop();
    }

    #[test]
    fn test_await_condition_accepts_non_sync_value() {
        let scheduler = started();
        let future = scheduler
            .await_condition(|| true, std::cell::Cell::new(7))
            .unwrap();

        let value = future.wait_for(Duration::from_secs(2)).unwrap();
        assert_eq!(value.map(|cell| cell.get()), Some(7));
        scheduler.stop();
    }

    #[test]
    fn test_restart_never_runs_two_loops() {
        let scheduler = started();
        let current = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        let runs = Arc::new(AtomicU64::new(0));
        let (c, p, r) = (Arc::clone(&current), Arc::clone(&peak), Arc::clone(&runs));
        scheduler
            .add_work_item("slow", move || {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                r.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                c.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while runs.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        scheduler.stop();
        scheduler.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        scheduler.stop();

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
