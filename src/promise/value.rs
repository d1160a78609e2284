//! Single-value result future.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use super::slot::{Outcome, Slot};
use crate::error::{AsyncSqlError, Result};

type ErrorHandler = Arc<dyn Fn(AsyncSqlError) + Send + Sync>;

/// Holds at most one value, written once.
///
/// Continuations registered with [`ValueFuture::on_value`] may fail; their
/// errors go to the error handler instead of the resolving thread.
///
/// # Examples
///
/// ```rust
/// use asyncsql_core::promise::ValueFuture;
/// use std::time::Duration;
///
/// let future = ValueFuture::new();
/// let reader = future.clone();
/// std::thread::spawn(move || { future.resolve(42); });
/// assert_eq!(reader.wait().unwrap(), 42);
/// assert_eq!(reader.wait_for_or(Duration::from_millis(1), 0), 42);
/// ```
pub struct ValueFuture<T> {
    slot: Arc<Slot<T>>,
    error_handler: Arc<Mutex<Option<ErrorHandler>>>,
}

impl<T> Clone for ValueFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            error_handler: Arc::clone(&self.error_handler),
        }
    }
}

impl<T: Clone + Send + 'static> Default for ValueFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ValueFuture<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
            error_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// A future that is already resolved
    pub fn ready(value: T) -> Self {
        let future = Self::new();
        future.resolve(value);
        future
    }

    /// Route failing continuations to `handler`
    pub fn with_error_handler(self, handler: impl Fn(AsyncSqlError) + Send + Sync + 'static) -> Self {
        *self.error_handler.lock() = Some(Arc::new(handler));
        self
    }

    /// Set the value and drain continuations. Later calls are ignored.
    pub fn resolve(&self, value: T) -> bool {
        self.slot.fill(value)
    }

    /// Record a failure so that [`ValueFuture::wait`] raises instead of blocking forever.
    pub fn fail(&self, error: AsyncSqlError) -> bool {
        self.slot.fail(error)
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_filled()
    }

    pub fn peek(&self) -> Option<T> {
        self.slot.peek()
    }

    pub fn error(&self) -> Option<AsyncSqlError> {
        self.slot.failure()
    }

    /// Runs with the value now if present, otherwise when it is resolved.
    pub fn on_value(&self, callback: impl FnOnce(&T) -> Result<()> + Send + 'static) -> &Self {
        let handler = Arc::clone(&self.error_handler);
        self.slot.on_fill(Box::new(move |value: &T| {
            if let Err(error) = callback(value) {
                match handler.lock().clone() {
                    Some(handler) => handler(error),
                    None => warn!(error = %error, "Value continuation failed"),
                }
            }
        }));
        self
    }

    /// Runs if the future fails before a value arrives.
    pub fn on_error(&self, callback: impl FnOnce(&AsyncSqlError) + Send + 'static) -> &Self {
        self.slot.on_failure(Box::new(callback));
        self
    }

    /// Derive a future that resolves with `f(value)` and inherits failures.
    pub fn map<U: Clone + Send + 'static>(&self, f: impl FnOnce(&T) -> U + Send + 'static) -> ValueFuture<U> {
        let mapped = ValueFuture::new();
        let sink = mapped.clone();
        self.on_value(move |value| {
            sink.resolve(f(value));
            Ok(())
        });
        let failed = mapped.clone();
        self.on_error(move |error| {
            failed.fail(error.clone());
        });
        mapped
    }

    /// Block until resolved (or failed)
    pub fn wait(&self) -> Result<T> {
        match self.slot.wait(true) {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut => Err(AsyncSqlError::Timeout("untimed wait returned early".to_string())),
        }
    }

    /// Block for at most `timeout`; `Ok(None)` when nothing arrived in time.
    pub fn wait_for(&self, timeout: Duration) -> Result<Option<T>> {
        match self.slot.wait_until(Instant::now() + timeout, true) {
            Outcome::Value(value) => Ok(Some(value)),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut => Ok(None),
        }
    }

    /// Never raises: a timeout or failure yields `default`.
    pub fn wait_for_or(&self, timeout: Duration, default: T) -> T {
        match self.wait_for(timeout) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(error) => {
                warn!(error = %error, "Wait failed, using default value");
                default
            }
        }
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for ValueFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueFuture")
            .field("value", &self.peek())
            .field("error", &self.error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_never_overwritten() {
        let future = ValueFuture::new();
        assert!(future.resolve("a"));
        assert!(!future.resolve("b"));
        assert_eq!(future.wait().unwrap(), "a");
    }

    #[test]
    fn test_failing_continuation_goes_to_handler() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let future = ValueFuture::new().with_error_handler(move |error| sink.lock().push(error));

        let ran_after = Arc::new(Mutex::new(false));
        future.on_value(|_: &u32| Err(AsyncSqlError::TaskExecution("bad row".into())));
        let flag = Arc::clone(&ran_after);
        future.on_value(move |_| {
            *flag.lock() = true;
            Ok(())
        });

        future.resolve(1);
        assert_eq!(
            *captured.lock(),
            vec![AsyncSqlError::TaskExecution("bad row".into())]
        );
        assert!(*ran_after.lock(), "a failing continuation must not stop the others");
    }

    #[test]
    fn test_wait_for_or_degrades_to_default() {
        let future: ValueFuture<bool> = ValueFuture::new();
        assert!(!future.wait_for_or(Duration::from_millis(10), false));

        future.fail(AsyncSqlError::NotConnected);
        assert!(future.wait_for_or(Duration::from_millis(10), true));
    }

    #[test]
    fn test_map_propagates_value_and_failure() {
        let source = ValueFuture::new();
        let doubled = source.map(|v: &i32| v * 2);
        source.resolve(21);
        assert_eq!(doubled.wait().unwrap(), 42);

        let failed: ValueFuture<i32> = ValueFuture::new();
        failed.fail(AsyncSqlError::NotConnected);
        let mapped = failed.map(|v| *v);
        assert_eq!(mapped.wait(), Err(AsyncSqlError::NotConnected));
    }
}
