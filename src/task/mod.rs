//! # Tasks
//!
//! A [`Task`] is one queued database operation. Its connection's drain work
//! item runs it exactly once against the live handle; a failure lands in the
//! task's own [`ErrorLatch`] and never affects sibling tasks.

pub mod error_latch;

use std::sync::Arc;

use uuid::Uuid;

use crate::database::DatabaseHandle;
use crate::error::Result;

pub use error_latch::ErrorLatch;

/// Operation run against the live handle. Shared so a retry can run it again.
pub type TaskAction = Arc<dyn Fn(&mut dyn DatabaseHandle) -> Result<()> + Send + Sync>;

/// One queued database operation
#[derive(Clone)]
pub struct Task {
    id: Uuid,
    action: TaskAction,
    latch: ErrorLatch,
}

impl Task {
    pub fn new(
        action: impl Fn(&mut dyn DatabaseHandle) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::from_action(Arc::new(action))
    }

    /// Reuse an existing action, e.g. when resubmitting after a failure.
    pub fn from_action(action: TaskAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            latch: ErrorLatch::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn error_latch(&self) -> &ErrorLatch {
        &self.latch
    }

    pub(crate) fn action(&self) -> TaskAction {
        Arc::clone(&self.action)
    }

    pub(crate) fn execute(&self, handle: &mut dyn DatabaseHandle) -> Result<()> {
        (self.action)(handle)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("latch", &self.latch)
            .finish()
    }
}
