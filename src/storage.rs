//! Process-wide registry keeping unowned observers alive.
//!
//! An observer is normally kept alive by the handles its caller holds.
//! Retaining it here gives "fire and forget" semantics: the observer stays
//! registered with no caller-held handle until it is stopped, at which point
//! it releases itself.

use crate::observer::Observer;
use crate::types::ObserverId;
use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeMap;
use tracing::trace;

static ENTRIES: Mutex<BTreeMap<ObserverId, Observer>> = const_mutex(BTreeMap::new());

/// The process-wide set of retained observers.
pub struct ObserverStorage;

impl ObserverStorage {
    /// Keep `observer` alive until it is stopped or released. Returns false
    /// if it was already retained or is no longer active.
    pub fn retain(observer: &Observer) -> bool {
        if !observer.is_active() {
            return false;
        }
        let previous = {
            let mut entries = ENTRIES.lock();
            entries.insert(observer.id(), observer.clone())
        };
        let inserted = previous.is_none();
        // Stopped while being inserted: undo.
        if !observer.is_active() {
            Self::release(observer.id());
            return false;
        }
        trace!(observer = %observer.id(), inserted, "observer retained");
        inserted
    }

    /// Drop the retained handle for `id`. Returns false if it was not
    /// retained.
    pub fn release(id: ObserverId) -> bool {
        // The handle may be the last one; drop it outside the lock since
        // dropping an observer stops it, which calls back into release.
        let removed = ENTRIES.lock().remove(&id);
        removed.is_some()
    }

    /// Number of retained observers.
    pub fn count() -> usize {
        ENTRIES.lock().len()
    }

    pub fn contains(id: ObserverId) -> bool {
        ENTRIES.lock().contains_key(&id)
    }
}
