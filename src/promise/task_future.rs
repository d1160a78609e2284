//! Result future bound to the [`Task`] that produces it.

use std::time::Duration;

use super::value::ValueFuture;
use crate::error::{AsyncSqlError, Result};
use crate::task::Task;

/// A [`ValueFuture`] whose waits abort as soon as the bound task records an
/// error in its [`ErrorLatch`](crate::task::ErrorLatch).
///
/// Returned by [`Connection::query`](crate::database::Connection::query).
pub struct TaskFuture<T> {
    value: ValueFuture<T>,
    task: Task,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            task: self.task.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// Tie `value` to `task`: a latched task error fails the future.
    pub(crate) fn bind(value: ValueFuture<T>, task: Task) -> Self {
        let sink = value.clone();
        task.error_latch().subscribe(move |error| {
            sink.fail(error.clone());
        });
        Self { value, task }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_resolved()
    }

    pub fn peek(&self) -> Option<T> {
        self.value.peek()
    }

    pub fn error(&self) -> Option<AsyncSqlError> {
        self.task.error_latch().error()
    }

    /// Block until the task resolves the value or records an error.
    pub fn wait(&self) -> Result<T> {
        self.value.wait()
    }

    /// Respects `timeout` even while the task is still queued.
    pub fn wait_for(&self, timeout: Duration) -> Result<Option<T>> {
        self.value.wait_for(timeout)
    }

    pub fn wait_for_or(&self, timeout: Duration, default: T) -> T {
        self.value.wait_for_or(timeout, default)
    }

    pub fn on_value(&self, callback: impl FnOnce(&T) -> Result<()> + Send + 'static) -> &Self {
        self.value.on_value(callback);
        self
    }

    pub fn on_error(&self, callback: impl FnOnce(&AsyncSqlError) + Send + 'static) -> &Self {
        self.value.on_error(callback);
        self
    }

    /// Derive a future of `f(value)` that still aborts on the task's error.
    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl FnOnce(&T) -> U + Send + 'static,
    ) -> TaskFuture<U> {
        TaskFuture {
            value: self.value.map(f),
            task: self.task.clone(),
        }
    }

    /// Detach from the task, keeping only the value channel
    pub fn into_value(self) -> ValueFuture<T> {
        self.value
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("task", &self.task.id())
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_task() -> Task {
        Task::new(|_| Ok(()))
    }

    #[test]
    fn test_wait_aborts_on_latched_error() {
        let task = noop_task();
        let future: TaskFuture<u64> = TaskFuture::bind(ValueFuture::new(), task.clone());

        let latch = task.error_latch().clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            latch.record(AsyncSqlError::TaskExecution("no such table".into()));
        });

        assert_eq!(
            future.wait(),
            Err(AsyncSqlError::TaskExecution("no such table".into()))
        );
    }

    #[test]
    fn test_error_recorded_before_bind_is_seen() {
        let task = noop_task();
        task.error_latch().record(AsyncSqlError::NotConnected);
        let future: TaskFuture<u64> = TaskFuture::bind(ValueFuture::new(), task);
        assert_eq!(
            future.wait_for(Duration::from_secs(1)),
            Err(AsyncSqlError::NotConnected)
        );
        assert_eq!(future.wait_for_or(Duration::from_millis(1), 9), 9);
    }

    #[test]
    fn test_mapped_future_resolves() {
        let value = ValueFuture::new();
        let future = TaskFuture::bind(value.clone(), noop_task());
        let len = future.map(|s: &String| s.len());
        value.resolve("four".to_string());
        assert_eq!(len.wait(), Ok(4));
        assert_eq!(len.task().id(), future.task().id());
    }
}
