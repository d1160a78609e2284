//! # Error Latch
//!
//! Single-slot, first-write-wins failure holder for one task. Subscribers see
//! the failure exactly once whether they registered before or after it was
//! recorded. The pre-throw hook runs once, after the failure is stored and
//! before any subscriber (and therefore any waiter) observes it; connections
//! use it to start reconnect-and-resubmit recovery.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AsyncSqlError, Result};

type Subscriber = Box<dyn FnOnce(&AsyncSqlError) + Send>;
type Hook = Box<dyn FnOnce(&AsyncSqlError) + Send>;

#[derive(Default)]
struct LatchState {
    error: Option<AsyncSqlError>,
    subscribers: Vec<Subscriber>,
    pre_throw: Option<Hook>,
}

/// Shared handle to a task's failure channel
#[derive(Clone, Default)]
pub struct ErrorLatch {
    state: Arc<Mutex<LatchState>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `error` if no failure was recorded yet, then run the hook and
    /// every pending subscriber. Returns `false` when a failure already won.
    pub fn record(&self, error: AsyncSqlError) -> bool {
        let (hook, subscribers) = {
            let mut state = self.state.lock();
            if state.error.is_some() {
                return false;
            }
            state.error = Some(error.clone());
            (
                state.pre_throw.take(),
                std::mem::take(&mut state.subscribers),
            )
        };

        if let Some(hook) = hook {
            hook(&error);
        }
        for subscriber in subscribers {
            subscriber(&error);
        }
        true
    }

    /// Register a subscriber; invoked immediately when a failure is present.
    pub fn subscribe(&self, subscriber: impl FnOnce(&AsyncSqlError) + Send + 'static) {
        let present = {
            let mut state = self.state.lock();
            match &state.error {
                Some(error) => error.clone(),
                None => {
                    state.subscribers.push(Box::new(subscriber));
                    return;
                }
            }
        };
        subscriber(&present);
    }

    /// Install the recovery hook. Replaces a hook that has not fired yet.
    pub fn set_pre_throw_hook(&self, hook: impl FnOnce(&AsyncSqlError) + Send + 'static) {
        let present = {
            let mut state = self.state.lock();
            match &state.error {
                Some(error) => error.clone(),
                None => {
                    state.pre_throw = Some(Box::new(hook));
                    return;
                }
            }
        };
        hook(&present);
    }

    pub fn error(&self) -> Option<AsyncSqlError> {
        self.state.lock().error.clone()
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().error.is_some()
    }

    /// `Err` with the recorded failure, `Ok` when there is none
    pub fn check(&self) -> Result<()> {
        match self.error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ErrorLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLatch")
            .field("error", &self.error())
            .finish()
    }
}
