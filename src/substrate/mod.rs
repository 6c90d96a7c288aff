//! The change-notification substrate observers are layered on.
//!
//! A [`Subject`] is anything that can read and write values by key path and
//! call a registered [`ChangeHandler`] when the value at a key path changes.
//! Observers only ever hold a `Weak` reference to their subject, so a subject
//! may be dropped at any time; deregistering from a dead subject is a no-op.
//!
//! [`PropertyObject`] is a thread-safe in-memory subject backed by a JSON
//! object, suitable both as a model type and as a test double.

mod object;

pub use object::PropertyObject;

use crate::error::Result;
use crate::types::{ChangeEvent, KeyPath, ObservingOptions, SubscriptionToken};
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Hook invoked by a subject for every change to an observed key path.
///
/// May be called on any thread, including the thread that performed the
/// write.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Shared, type-erased subject handle.
pub type SubjectRef = Arc<dyn Subject>;

/// An observable entity with named properties.
pub trait Subject: Send + Sync + 'static {
    /// Read the current value at `key_path`. Missing values read as `Null`.
    fn value_for_key_path(&self, key_path: &KeyPath) -> Result<Value>;

    /// Write `value` at `key_path`, notifying overlapping registrations.
    fn set_value_for_key_path(&self, key_path: &KeyPath, value: Value) -> Result<()>;

    /// Start delivering changes at `key_path` to `handler`.
    ///
    /// `options.initial` is ignored; observers deliver the initial value
    /// themselves.
    fn register(
        &self,
        key_path: &KeyPath,
        options: ObservingOptions,
        handler: ChangeHandler,
    ) -> Result<SubscriptionToken>;

    /// Stop delivering to the registration behind `token`. Unknown tokens
    /// are ignored.
    fn unregister(&self, token: SubscriptionToken);
}

/// Identity of a subject allocation, independent of the vtable.
pub(crate) fn subject_addr(subject: &Weak<dyn Subject>) -> *const () {
    subject.as_ptr() as *const ()
}
