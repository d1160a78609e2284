//! Write-once value cell shared by every future flavor.
//!
//! Waiters park on a condition variable. Continuations run on the thread that
//! fills the slot, after the lock is released, in registration order.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::AsyncSqlError;

pub(crate) type Continuation<T> = Box<dyn FnOnce(&T) + Send>;
pub(crate) type FailureContinuation = Box<dyn FnOnce(&AsyncSqlError) + Send>;

struct SlotState<T> {
    value: Option<T>,
    failure: Option<AsyncSqlError>,
    continuations: Vec<Continuation<T>>,
    failure_continuations: Vec<FailureContinuation>,
}

pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

/// What a wait observed
pub(crate) enum Outcome<T> {
    Value(T),
    Failed(AsyncSqlError),
    TimedOut,
}

impl<T: Clone + Send + 'static> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                failure: None,
                continuations: Vec::new(),
                failure_continuations: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    /// First write wins. Returns `false` if a value was already present.
    pub(crate) fn fill(&self, value: T) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            state.failure_continuations.clear();
            std::mem::take(&mut state.continuations)
        };
        self.ready.notify_all();

        for continuation in continuations {
            continuation(&value);
        }
        true
    }

    /// Record a failure. A later `fill` still succeeds; the value then wins.
    pub(crate) fn fail(&self, error: AsyncSqlError) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if state.value.is_some() || state.failure.is_some() {
                return false;
            }
            state.failure = Some(error.clone());
            std::mem::take(&mut state.failure_continuations)
        };
        self.ready.notify_all();

        for continuation in continuations {
            continuation(&error);
        }
        true
    }

    /// Runs at most once, and never once a value is present.
    pub(crate) fn on_failure(&self, continuation: FailureContinuation) {
        let present = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return;
            }
            match &state.failure {
                Some(error) => error.clone(),
                None => {
                    state.failure_continuations.push(continuation);
                    return;
                }
            }
        };
        continuation(&present);
    }

    pub(crate) fn on_fill(&self, continuation: Continuation<T>) {
        let present = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.continuations.push(continuation);
                    return;
                }
            }
        };
        continuation(&present);
    }

    pub(crate) fn peek(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub(crate) fn failure(&self) -> Option<AsyncSqlError> {
        self.state.lock().failure.clone()
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Block until a value arrives, or a failure when `abort_on_failure`.
    pub(crate) fn wait(&self, abort_on_failure: bool) -> Outcome<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = &state.value {
                return Outcome::Value(value.clone());
            }
            if abort_on_failure {
                if let Some(failure) = &state.failure {
                    return Outcome::Failed(failure.clone());
                }
            }
            self.ready.wait(&mut state);
        }
    }

    /// Like [`Slot::wait`] but gives up at `deadline`.
    pub(crate) fn wait_until(&self, deadline: Instant, abort_on_failure: bool) -> Outcome<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = &state.value {
                return Outcome::Value(value.clone());
            }
            if abort_on_failure {
                if let Some(failure) = &state.failure {
                    return Outcome::Failed(failure.clone());
                }
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match &state.value {
                    Some(value) => Outcome::Value(value.clone()),
                    None => Outcome::TimedOut,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_fill_wins() {
        let slot = Slot::new();
        assert!(slot.fill(1));
        assert!(!slot.fill(2));
        assert_eq!(slot.peek(), Some(1));
    }

    #[test]
    fn test_continuations_run_in_registration_order() {
        let slot = Slot::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            slot.on_fill(Box::new(move |value: &i32| seen.lock().push((tag, *value))));
        }
        slot.fill(7);
        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_wait_wakes_on_fill_from_other_thread() {
        let slot = Arc::new(Slot::new());
        let writer = Arc::clone(&slot);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.fill("done".to_string());
        });
        assert!(matches!(slot.wait(true), Outcome::Value(v) if v == "done"));
        handle.join().expect("writer thread");
    }

    #[test]
    fn test_wait_until_times_out() {
        let slot: Slot<u8> = Slot::new();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(matches!(slot.wait_until(deadline, true), Outcome::TimedOut));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_failure_only_aborts_when_requested() {
        let slot: Slot<u8> = Slot::new();
        slot.fail(AsyncSqlError::NotConnected);
        assert!(matches!(slot.wait(true), Outcome::Failed(AsyncSqlError::NotConnected)));

        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(slot.wait_until(deadline, false), Outcome::TimedOut));

        // A late value still lands and wins over the failure
        assert!(slot.fill(3));
        assert!(matches!(slot.wait(true), Outcome::Value(3)));
    }
}
