//! Where observer callbacks run.
//!
//! Subjects notify on whatever thread performed the write. An observer
//! either runs its callback right there ([`DeliveryContext::Immediate`]) or
//! marshals it onto a [`CallbackQueue`] ([`DeliveryContext::Queued`]), in
//! which case the writing thread never waits for the callback. Each queued
//! observer gets its own lane on the queue, so its callbacks run in order
//! and never overlap, even on a concurrent pool.
//!
//! Stopping an observer does not retract callbacks already queued: one
//! invocation may still run after `stop()` returns. Retracting it would mean
//! blocking `stop()` on the target queue.

mod queue;

pub use queue::{CallbackQueue, QueueConfig};
pub(crate) use queue::SerialLane;

/// Execution context for an observer's callback.
#[derive(Clone, Debug, Default)]
pub enum DeliveryContext {
    /// Run synchronously on the notifying thread.
    #[default]
    Immediate,
    /// Run as a task on the given queue.
    Queued(CallbackQueue),
}

impl From<CallbackQueue> for DeliveryContext {
    fn from(queue: CallbackQueue) -> Self {
        DeliveryContext::Queued(queue)
    }
}
