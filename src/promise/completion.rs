//! Fire-and-forget completion signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::slot::{Outcome, Slot};
use crate::error::{AsyncSqlError, Result};

/// Signals that something happened, without carrying a value.
///
/// Returned by [`Connection::update`](crate::database::Connection::update)
/// and the write operations of [`Table`](crate::database::Table).
///
/// # Examples
///
/// ```rust
/// use asyncsql_core::promise::CompletionFuture;
/// use std::time::Duration;
///
/// let done = CompletionFuture::new();
/// done.on_complete(|| println!("flushed"));
/// done.complete();
/// assert!(done.wait_for(Duration::from_millis(1)).unwrap());
/// ```
#[derive(Clone)]
pub struct CompletionFuture {
    slot: Arc<Slot<()>>,
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionFuture {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
        }
    }

    /// Mark complete and run continuations. Only the first call has an effect.
    pub fn complete(&self) -> bool {
        self.slot.fill(())
    }

    /// Record the failure that waiters will raise
    pub fn fail(&self, error: AsyncSqlError) -> bool {
        self.slot.fail(error)
    }

    pub fn is_complete(&self) -> bool {
        self.slot.is_filled()
    }

    pub fn error(&self) -> Option<AsyncSqlError> {
        self.slot.failure()
    }

    /// Runs immediately when already complete, otherwise at completion time.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        self.slot.on_fill(Box::new(move |_: &()| callback()));
        self
    }

    /// Block until complete, raising a recorded failure.
    pub fn wait(&self) -> Result<()> {
        match self.slot.wait(true) {
            Outcome::Value(()) => Ok(()),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut => Err(AsyncSqlError::Timeout("untimed wait returned early".to_string())),
        }
    }

    /// Block for at most `timeout`. `Ok(false)` means the timeout elapsed first.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        match self.slot.wait_until(Instant::now() + timeout, true) {
            Outcome::Value(()) => Ok(true),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut => Ok(false),
        }
    }
}

impl std::fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("complete", &self.is_complete())
            .field("error", &self.error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_callbacks_run_once_in_order() {
        let future = CompletionFuture::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        future.on_complete(move || first.lock().push("first"));
        let second = Arc::clone(&log);
        future.on_complete(move || second.lock().push("second"));

        assert!(future.complete());
        assert!(!future.complete());
        assert_eq!(*log.lock(), vec!["first", "second"]);

        // Late registration runs immediately
        let late = Arc::clone(&log);
        future.on_complete(move || late.lock().push("late"));
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_wait_raises_recorded_failure() {
        let future = CompletionFuture::new();
        let failing = future.clone();
        std::thread::spawn(move || {
            failing.fail(AsyncSqlError::TaskExecution("syntax error".into()));
        });
        assert_eq!(
            future.wait(),
            Err(AsyncSqlError::TaskExecution("syntax error".into()))
        );
    }

    #[test]
    fn test_wait_for_returns_false_on_timeout() {
        let future = CompletionFuture::new();
        let started = Instant::now();
        assert_eq!(future.wait_for(Duration::from_millis(25)), Ok(false));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
