//! Owner-scoped teardown.
//!
//! Observers and binders can be tied to the lifetime of an arbitrary owner
//! without that owner's type taking part. A side-table keyed by owner
//! identity holds the attached handles; when the owner ends, every attached
//! observer and binder is stopped exactly once.
//!
//! Rust has no hook that runs when an arbitrary value is dropped, so the
//! owner's destruction path must reach the side-table. There are two ways to
//! wire that up:
//!
//! - Hold a [`Lifetime`] (as a field, or next to the owner). Dropping it
//!   ends the owner.
//! - Key by the owner's allocation with [`OwnerKey::of`] and call [`end`]
//!   from the owner's `Drop`.
//!
//! ```ignore
//! struct Controller {
//!     lifetime: Lifetime,
//! }
//!
//! let controller = Controller { lifetime: Lifetime::new() };
//! Observer::observe(&account, "balance")
//!     .owned_by(&controller.lifetime)
//!     .old_and_new(|old, new| println!("{old:?} -> {new:?}"))?;
//!
//! drop(controller); // the observer is stopped here
//! ```

use crate::binder::Binder;
use crate::observer::Observer;
use crate::substrate::Subject;
use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static ATTACHMENTS: Mutex<BTreeMap<OwnerKey, Vec<Attachment>>> = const_mutex(BTreeMap::new());

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Identity of an owner in the side-table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OwnerKey {
    /// A [`Lifetime`] scope.
    Scope(u64),
    /// The address of an owner's allocation.
    Address(usize),
}

impl OwnerKey {
    /// Key an owner by its allocation. The owner must call [`end`] with
    /// this key before it is freed, or a later allocation at the same
    /// address would inherit its attachments.
    pub fn of<T: ?Sized>(owner: &Arc<T>) -> Self {
        OwnerKey::Address(Arc::as_ptr(owner) as *const () as usize)
    }
}

/// Something whose teardown is tied to an owner.
#[derive(Clone, Debug)]
pub enum Attachment {
    Observer(Observer),
    Binder(Binder),
}

impl Attachment {
    fn stop(&self) {
        match self {
            Attachment::Observer(observer) => observer.stop(),
            Attachment::Binder(binder) => binder.stop_binding(),
        }
    }

    fn observes<S: Subject>(&self, subject: &Arc<S>) -> bool {
        match self {
            Attachment::Observer(observer) => observer.observes(subject),
            Attachment::Binder(binder) => binder.involves(subject),
        }
    }
}

impl From<Observer> for Attachment {
    fn from(observer: Observer) -> Self {
        Attachment::Observer(observer)
    }
}

impl From<Binder> for Attachment {
    fn from(binder: Binder) -> Self {
        Attachment::Binder(binder)
    }
}

/// Tie `attachment` to `owner`. It is stopped when the owner ends.
pub fn attach(attachment: impl Into<Attachment>, owner: OwnerKey) {
    ATTACHMENTS
        .lock()
        .entry(owner)
        .or_default()
        .push(attachment.into());
}

/// End `owner`: stop everything attached to it. Returns how many
/// attachments were stopped.
pub fn end(owner: OwnerKey) -> usize {
    let attached = ATTACHMENTS.lock().remove(&owner).unwrap_or_default();
    for attachment in &attached {
        attachment.stop();
    }
    if !attached.is_empty() {
        debug!(?owner, count = attached.len(), "owner ended, attachments stopped");
    }
    attached.len()
}

/// Stop and detach the owner's observers and binders that involve
/// `subject`, leaving its other attachments in place. Returns how many
/// were stopped.
pub fn stop_observing<S: Subject>(owner: OwnerKey, subject: &Arc<S>) -> usize {
    let matching: Vec<Attachment> = {
        let mut table = ATTACHMENTS.lock();
        let Some(attached) = table.get_mut(&owner) else {
            return 0;
        };
        let (matching, rest) = attached.drain(..).partition(|a| a.observes(subject));
        *attached = rest;
        if attached.is_empty() {
            table.remove(&owner);
        }
        matching
    };
    for attachment in &matching {
        attachment.stop();
    }
    matching.len()
}

/// Number of attachments currently tied to `owner`.
pub fn attached_count(owner: OwnerKey) -> usize {
    ATTACHMENTS.lock().get(&owner).map_or(0, Vec::len)
}

/// A scope that ends its owner when dropped.
///
/// Embed one in an owner type (or keep it beside the owner) to stop every
/// observer and binder attached to it when the owner is destroyed.
#[derive(Debug)]
pub struct Lifetime {
    key: OwnerKey,
}

impl Lifetime {
    pub fn new() -> Self {
        Self {
            key: OwnerKey::Scope(NEXT_SCOPE.fetch_add(1, Ordering::SeqCst)),
        }
    }

    pub fn key(&self) -> OwnerKey {
        self.key
    }

    pub fn attach(&self, attachment: impl Into<Attachment>) {
        attach(attachment, self.key);
    }

    pub fn attached_count(&self) -> usize {
        attached_count(self.key)
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        end(self.key);
    }
}

impl From<&Lifetime> for OwnerKey {
    fn from(lifetime: &Lifetime) -> Self {
        lifetime.key
    }
}
