//! In-memory subject backed by a JSON object.

use crate::error::{ObserveError, Result};
use crate::types::{ChangeEvent, ChangeKind, KeyPath, ObservingOptions, SubscriptionToken};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use super::{ChangeHandler, Subject};

/// One registered observation.
#[derive(Clone)]
struct Registration {
    key_path: KeyPath,
    options: ObservingOptions,
    handler: ChangeHandler,
}

/// A change waiting to be handed to one registration.
struct Notification {
    token: SubscriptionToken,
    handler: ChangeHandler,
    event: ChangeEvent,
}

impl Notification {
    fn new(token: SubscriptionToken, reg: &Registration, event: ChangeEvent) -> Self {
        Self {
            token,
            handler: reg.handler.clone(),
            event,
        }
    }
}

/// Notifications not yet delivered, and the thread delivering them.
#[derive(Default)]
struct Outbox {
    pending: VecDeque<Notification>,
    drainer: Option<ThreadId>,
}

/// Gives up the drainer role if a handler panics mid-drain.
struct DrainerGuard<'a> {
    outbox: &'a Mutex<Outbox>,
    thread: ThreadId,
}

impl Drop for DrainerGuard<'_> {
    fn drop(&mut self) {
        let mut outbox = self.outbox.lock();
        if outbox.drainer == Some(self.thread) {
            outbox.drainer = None;
        }
    }
}

/// A pending mutation of the value at one key path.
enum Edit {
    Set(Value),
    Insert(usize, Value),
    Remove(usize),
    Replace(usize, Value),
}

impl Edit {
    fn kind(&self) -> ChangeKind {
        match self {
            Edit::Set(_) => ChangeKind::Set,
            Edit::Insert(..) => ChangeKind::Insert,
            Edit::Remove(_) => ChangeKind::Remove,
            Edit::Replace(..) => ChangeKind::Replace,
        }
    }

    fn index(&self) -> Option<usize> {
        match self {
            Edit::Set(_) => None,
            Edit::Insert(i, _) | Edit::Remove(i) | Edit::Replace(i, _) => Some(*i),
        }
    }

    fn inserted(&self) -> Option<&Value> {
        match self {
            Edit::Insert(_, v) | Edit::Replace(_, v) => Some(v),
            _ => None,
        }
    }
}

/// A thread-safe observable object whose properties are JSON values.
///
/// Dotted key paths address nested objects. Writes notify every
/// registration whose key path overlaps the written one; array mutators
/// (`insert`, `remove`, `replace`) report collection change kinds to
/// registrations on exactly that path.
///
/// Notifications for one object are delivered by one thread at a time, in
/// the order the writes were made, so each registration sees its changes
/// FIFO. Handlers may write into this or any other object from inside a
/// notification. A nested write to an object the current thread is already
/// delivering for is delivered before the write returns; a write to an
/// object another thread is delivering for is queued to that thread.
pub struct PropertyObject {
    values: RwLock<Map<String, Value>>,
    registrations: Mutex<BTreeMap<SubscriptionToken, Registration>>,
    next_token: AtomicU64,
    unregister_calls: AtomicU64,
    outbox: Mutex<Outbox>,
}

impl PropertyObject {
    /// Create an object with no properties.
    pub fn new() -> Self {
        Self::with_properties(Map::new())
    }

    /// Create an object with the given properties.
    pub fn with_properties(properties: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(properties),
            registrations: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(1),
            unregister_calls: AtomicU64::new(0),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    /// Create an object from a JSON object value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::with_properties(map)),
            other => Err(ObserveError::InvalidOperation(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Read the value at a dotted key path.
    pub fn get(&self, key_path: &str) -> Result<Value> {
        self.value_for_key_path(&KeyPath::parse(key_path)?)
    }

    /// Write the value at a dotted key path.
    pub fn set(&self, key_path: &str, value: impl Into<Value>) -> Result<()> {
        self.apply(&KeyPath::parse(key_path)?, Edit::Set(value.into()))
    }

    /// Insert `value` at `index` into the array at `key_path`.
    pub fn insert(&self, key_path: &str, index: usize, value: impl Into<Value>) -> Result<()> {
        self.apply(&KeyPath::parse(key_path)?, Edit::Insert(index, value.into()))
    }

    /// Remove the element at `index` from the array at `key_path`.
    pub fn remove(&self, key_path: &str, index: usize) -> Result<()> {
        self.apply(&KeyPath::parse(key_path)?, Edit::Remove(index))
    }

    /// Replace the element at `index` in the array at `key_path`.
    pub fn replace(&self, key_path: &str, index: usize, value: impl Into<Value>) -> Result<()> {
        self.apply(&KeyPath::parse(key_path)?, Edit::Replace(index, value.into()))
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Number of `unregister` calls received, including ones for unknown
    /// tokens.
    pub fn unregister_count(&self) -> u64 {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    // --- Internals ---

    fn read(values: &Map<String, Value>, key_path: &KeyPath) -> Result<Value> {
        let mut current: Option<&Value> = None;
        for (depth, segment) in key_path.segments().iter().enumerate() {
            let next = if depth == 0 {
                values.get(segment)
            } else {
                match current {
                    Some(Value::Object(map)) => map.get(segment),
                    Some(Value::Null) | None => None,
                    Some(_) => {
                        return Err(ObserveError::InvalidKeyPath(key_path.to_string()));
                    }
                }
            };
            match next {
                Some(value) => current = Some(value),
                None => return Ok(Value::Null),
            }
        }
        Ok(current.cloned().unwrap_or(Value::Null))
    }

    /// Read for notification payloads: a path broken by a write reads as
    /// `Null`.
    fn read_lenient(values: &Map<String, Value>, key_path: &KeyPath) -> Value {
        Self::read(values, key_path).unwrap_or(Value::Null)
    }

    fn write(values: &mut Map<String, Value>, key_path: &KeyPath, value: Value) -> Result<()> {
        let (last, parents) = match key_path.segments().split_last() {
            Some(split) => split,
            None => return Err(ObserveError::InvalidKeyPath(key_path.to_string())),
        };

        let mut map = values;
        for segment in parents {
            let slot = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            map = match slot {
                Value::Object(inner) => inner,
                _ => return Err(ObserveError::InvalidKeyPath(key_path.to_string())),
            };
        }
        map.insert(last.clone(), value);
        Ok(())
    }

    fn affected(&self, key_path: &KeyPath) -> Vec<(SubscriptionToken, Registration)> {
        self.registrations
            .lock()
            .iter()
            .filter(|(_, reg)| reg.key_path.overlaps(key_path))
            .map(|(token, reg)| (*token, reg.clone()))
            .collect()
    }

    fn apply(&self, key_path: &KeyPath, edit: Edit) -> Result<()> {
        let batch = {
            let mut values = self.values.write();

            let current = Self::read(&values, key_path)?;
            let (updated, touched) = match &edit {
                Edit::Set(value) => (value.clone(), None),
                Edit::Insert(index, value) => {
                    let mut items = Self::collection(key_path, &current)?;
                    if *index > items.len() {
                        return Err(ObserveError::IndexOutOfBounds {
                            index: *index,
                            len: items.len(),
                        });
                    }
                    items.insert(*index, value.clone());
                    (Value::Array(items), None)
                }
                Edit::Remove(index) | Edit::Replace(index, _) => {
                    let mut items = Self::collection(key_path, &current)?;
                    if *index >= items.len() {
                        return Err(ObserveError::IndexOutOfBounds {
                            index: *index,
                            len: items.len(),
                        });
                    }
                    let previous = match edit.inserted() {
                        Some(value) => std::mem::replace(&mut items[*index], value.clone()),
                        None => items.remove(*index),
                    };
                    (Value::Array(items), Some(previous))
                }
            };

            let registrations = self.affected(key_path);
            let before: Vec<Value> = registrations
                .iter()
                .map(|(_, reg)| Self::read_lenient(&values, &reg.key_path))
                .collect();

            let mut batch = Vec::new();
            for ((token, reg), old) in registrations.iter().zip(&before) {
                if reg.options.prior {
                    let mut event =
                        Self::event_for(reg, key_path, &edit, old, None, touched.as_ref());
                    event.is_prior = true;
                    event.new = None;
                    batch.push(Notification::new(*token, reg, event));
                }
            }

            Self::write(&mut values, key_path, updated)?;

            for ((token, reg), old) in registrations.iter().zip(&before) {
                let new = Self::read_lenient(&values, &reg.key_path);
                let event =
                    Self::event_for(reg, key_path, &edit, old, Some(&new), touched.as_ref());
                batch.push(Notification::new(*token, reg, event));
            }
            batch
        };

        self.deliver(batch);
        Ok(())
    }

    /// Hand a batch of notifications to the delivering thread.
    ///
    /// The first writing thread becomes the drainer and delivers everything
    /// queued until the outbox is empty. A write the drainer makes from
    /// inside a handler is queued behind what is already pending and
    /// drained before that write returns. Writes from other threads are
    /// queued and the writer returns without waiting.
    fn deliver(&self, batch: Vec<Notification>) {
        let me = thread::current().id();
        let owns_role = {
            let mut outbox = self.outbox.lock();
            outbox.pending.extend(batch);
            let drainer = outbox.drainer;
            match drainer {
                // Nested write: the outer frame keeps the role.
                Some(drainer) if drainer == me => false,
                Some(_) => return,
                None => {
                    outbox.drainer = Some(me);
                    true
                }
            }
        };

        let _release = owns_role.then(|| DrainerGuard {
            outbox: &self.outbox,
            thread: me,
        });
        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                let next = outbox.pending.pop_front();
                if next.is_none() && owns_role {
                    outbox.drainer = None;
                }
                next
            };
            match next {
                Some(notification) => self.notify(notification),
                None => return,
            }
        }
    }

    fn notify(&self, notification: Notification) {
        // Unregistered while queued.
        if !self.registrations.lock().contains_key(&notification.token) {
            return;
        }
        (notification.handler)(&notification.event);
    }

    fn collection(key_path: &KeyPath, value: &Value) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(ObserveError::NotACollection(key_path.to_string())),
        }
    }

    /// Build the event one registration sees for `edit`.
    fn event_for(
        reg: &Registration,
        written: &KeyPath,
        edit: &Edit,
        old: &Value,
        new: Option<&Value>,
        touched: Option<&Value>,
    ) -> ChangeEvent {
        let whole_value = matches!(edit, Edit::Set(_)) || reg.key_path != *written;
        if whole_value {
            return ChangeEvent::set(
                reg.options.old.then(|| old.clone()),
                new.filter(|_| reg.options.new).cloned(),
            );
        }

        ChangeEvent {
            kind: edit.kind(),
            old: touched
                .filter(|_| reg.options.old)
                .map(|v| Value::Array(vec![v.clone()])),
            new: edit
                .inserted()
                .filter(|_| reg.options.new)
                .map(|v| Value::Array(vec![v.clone()])),
            indexes: edit.index().map(|i| vec![i]),
            is_prior: false,
        }
    }
}

impl Default for PropertyObject {
    fn default() -> Self {
        Self::new()
    }
}

impl Subject for PropertyObject {
    fn value_for_key_path(&self, key_path: &KeyPath) -> Result<Value> {
        Self::read(&self.values.read(), key_path)
    }

    fn set_value_for_key_path(&self, key_path: &KeyPath, value: Value) -> Result<()> {
        self.apply(key_path, Edit::Set(value))
    }

    fn register(
        &self,
        key_path: &KeyPath,
        options: ObservingOptions,
        handler: ChangeHandler,
    ) -> Result<SubscriptionToken> {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.registrations.lock().insert(
            token,
            Registration {
                key_path: key_path.clone(),
                options,
                handler,
            },
        );
        Ok(token)
    }

    fn unregister(&self, token: SubscriptionToken) {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        self.registrations.lock().remove(&token);
    }
}
