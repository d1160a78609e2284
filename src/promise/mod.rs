//! # Futures
//!
//! Blocking-wait result containers handed back by every asynchronous
//! operation in the crate:
//!
//! - [`CompletionFuture`]: "it happened", with ordered continuations
//! - [`ValueFuture`]: one value, written once
//! - [`TaskFuture`]: a value future that also fails when its task errors
//!
//! Values and completion flags are never overwritten once set. Waits park on
//! a condition variable; continuations run on the thread that resolves the
//! future, which is usually the scheduler thread, so they must not block on
//! another future.

mod completion;
mod slot;
mod task_future;
mod value;

pub use completion::CompletionFuture;
pub use task_future::TaskFuture;
pub use value::ValueFuture;
