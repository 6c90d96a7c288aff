//! Binder: keeps a destination key path in sync with a source key path.

use crate::delivery::DeliveryContext;
use crate::error::{ObserveError, Result};
use crate::observer::{CallbackShape, Observer};
use crate::substrate::{subject_addr, Subject, SubjectRef};
use crate::types::{ChangeEvent, ChangeKind, KeyPath, ObservingOptions};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::transform::Transform;

/// Which way values flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BindingMode {
    /// Source to destination only.
    #[default]
    OneWay,
    /// Both ways; needs a reversible transform.
    TwoWay,
}

/// Binder configuration.
#[derive(Clone, Debug)]
pub struct BinderConfig {
    /// Default: one-way.
    pub mode: BindingMode,

    /// Default: copy values unchanged.
    pub transform: Transform,

    /// Drop a propagation triggered by this binder's own write.
    /// Always on for two-way binders. With this off, a one-way binder whose
    /// writes feed back into its own source keeps propagating them.
    /// Default: true
    pub suppress_reentrancy: bool,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            mode: BindingMode::OneWay,
            transform: Transform::None,
            suppress_reentrancy: true,
        }
    }
}

/// Propagation counts, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Writes made to the destination.
    pub forward: u64,
    /// Writes made back to the source.
    pub reverse: u64,
    /// Changes dropped because they were caused by this binder's own write.
    pub suppressed: u64,
}

#[derive(Default)]
struct Counters {
    forward: AtomicU64,
    reverse: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }
}

/// Per-binder bookkeeping around propagated writes.
///
/// Every value the binder writes is recorded as an echo expected by the
/// direction observing that endpoint. When the change comes back, on this
/// thread or on whichever thread drains the endpoint, the receiving side
/// consumes the echo instead of propagating it again.
///
/// Propagations without echo tracking fall back to a flag: a write made
/// while applying a propagation notifies synchronously on the same thread,
/// the re-entrant lock lets that nested notification in and the flag tells
/// it to stand down. Propagations from other threads wait their turn.
struct PropagationGuard {
    propagating: ReentrantMutex<Cell<bool>>,
    suppress: bool,
    /// Indexed by the direction that will receive the echo.
    echoes: Mutex<[VecDeque<Value>; 2]>,
}

/// Puts the flag back when a propagation ends, even by panic.
struct Restore<'a>(&'a Cell<bool>, bool);

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        self.0.set(self.1);
    }
}

impl PropagationGuard {
    fn new(suppress: bool) -> Self {
        Self {
            propagating: ReentrantMutex::new(Cell::new(false)),
            suppress,
            echoes: Mutex::new([VecDeque::new(), VecDeque::new()]),
        }
    }

    /// Run `write` unless `nested_check` is set and it would re-enter a
    /// propagation already underway. Returns false if suppressed.
    fn propagate(&self, nested_check: bool, write: impl FnOnce()) -> bool {
        let state = self.propagating.lock();
        if nested_check && self.suppress && state.get() {
            return false;
        }
        let _restore = Restore(&state, state.replace(true));
        write();
        true
    }

    fn expect_echo(&self, receiver: Direction, value: &Value) {
        self.echoes.lock()[receiver.index()].push_back(value.clone());
    }

    /// Withdraw the most recent matching echo after a failed write.
    fn forget_echo(&self, receiver: Direction, value: &Value) {
        let mut echoes = self.echoes.lock();
        let pending = &mut echoes[receiver.index()];
        if let Some(at) = pending.iter().rposition(|v| v == value) {
            pending.remove(at);
        }
    }

    /// True if `value` arriving at `receiver` is one of this binder's own
    /// writes. Consumes the oldest matching echo.
    fn take_echo(&self, receiver: Direction, value: &Value) -> bool {
        let mut echoes = self.echoes.lock();
        let pending = &mut echoes[receiver.index()];
        match pending.iter().position(|v| v == value) {
            Some(at) => {
                pending.remove(at);
                true
            }
            None => false,
        }
    }
}

/// One end of a binding.
struct Endpoint {
    subject: Weak<dyn Subject>,
    key_path: KeyPath,
}

/// Build the callback carrying changes from `source` to `destination`.
///
/// `echo_to` names the direction that observes `destination`, if any;
/// writes are then tracked as echoes rather than guarded by the flag.
fn propagation(
    direction: Direction,
    echo_to: Option<Direction>,
    source: Endpoint,
    destination: Endpoint,
    transform: Transform,
    guard: Arc<PropagationGuard>,
    counters: Arc<Counters>,
) -> CallbackShape {
    CallbackShape::change(move |change: &ChangeEvent| {
        if change.is_prior {
            return;
        }
        if let (ChangeKind::Set, Some(new)) = (change.kind, &change.new) {
            if guard.take_echo(direction, new) {
                counters.suppressed.fetch_add(1, Ordering::Relaxed);
                trace!(?direction, "own write came back, not propagating");
                return;
            }
        }
        let Some(target) = destination.subject.upgrade() else {
            trace!(?direction, "binding destination gone");
            return;
        };

        let value = match (change.kind, &change.new) {
            (ChangeKind::Set, Some(value)) => value.clone(),
            // Collection changes carry only the touched elements.
            _ => match source.subject.upgrade() {
                Some(subject) => match subject.value_for_key_path(&source.key_path) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(?direction, error = %e, "could not read bound value");
                        return;
                    }
                },
                None => return,
            },
        };

        let mapped = match direction {
            Direction::Forward => transform.forward(&value),
            Direction::Reverse => transform.reverse(&value),
        };
        let Some(mapped) = mapped else {
            debug!(?direction, "transform produced no value, not propagating");
            return;
        };

        let applied = guard.propagate(echo_to.is_none(), || {
            if let Some(receiver) = echo_to {
                guard.expect_echo(receiver, &mapped);
            }
            match target.set_value_for_key_path(&destination.key_path, mapped.clone()) {
                Ok(()) => {
                    let counter = match direction {
                        Direction::Forward => &counters.forward,
                        Direction::Reverse => &counters.reverse,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if let Some(receiver) = echo_to {
                        guard.forget_echo(receiver, &mapped);
                    }
                    warn!(?direction, key_path = %destination.key_path, error = %e, "bound write rejected");
                }
            }
        });
        if !applied {
            counters.suppressed.fetch_add(1, Ordering::Relaxed);
            trace!(?direction, "propagation suppressed during own write");
        }
    })
}

struct BinderInner {
    forward: Observer,
    reverse: Option<Observer>,
    from: Weak<dyn Subject>,
    to: Weak<dyn Subject>,
    mode: BindingMode,
    counters: Arc<Counters>,
}

impl Drop for BinderInner {
    fn drop(&mut self) {
        self.forward.stop();
        if let Some(reverse) = &self.reverse {
            reverse.stop();
        }
    }
}

/// Propagates changes from a source key path to a destination key path,
/// optionally transformed and optionally in both directions.
///
/// On creation the source's current value is written to the destination.
/// Every later change is written through, even when the destination already
/// holds the value. The binder recognizes its own writes when their change
/// notifications come back, whichever thread delivers them, and does not
/// propagate those again.
///
/// Cloning shares the binding; it stops on [`stop_binding`](Self::stop_binding)
/// or when the last handle is dropped.
#[derive(Clone)]
pub struct Binder {
    inner: Arc<BinderInner>,
}

impl Binder {
    /// Bind `to_key_path` on `to` to `from_key_path` on `from`.
    ///
    /// Fails with `IrreversibleTransform` for a two-way binding whose
    /// transform has no inverse, and with `AliasedEndpoints` for a two-way
    /// binding between overlapping key paths of the same subject; both are
    /// checked before anything is propagated.
    pub fn create<F: Subject, T: Subject>(
        from: &Arc<F>,
        from_key_path: &str,
        to: &Arc<T>,
        to_key_path: &str,
        config: BinderConfig,
    ) -> Result<Self> {
        let from: SubjectRef = from.clone();
        let to: SubjectRef = to.clone();
        Self::create_with_refs(&from, from_key_path, &to, to_key_path, config)
    }

    /// [`create`](Self::create) for type-erased subjects.
    pub fn create_with_refs(
        from: &SubjectRef,
        from_key_path: &str,
        to: &SubjectRef,
        to_key_path: &str,
        config: BinderConfig,
    ) -> Result<Self> {
        let from_path = KeyPath::parse(from_key_path)?;
        let to_path = KeyPath::parse(to_key_path)?;
        let two_way = config.mode == BindingMode::TwoWay;

        if two_way && !config.transform.is_reversible() {
            return Err(ObserveError::IrreversibleTransform);
        }
        let from_weak = Arc::downgrade(from);
        let to_weak = Arc::downgrade(to);
        if two_way && subject_addr(&from_weak) == subject_addr(&to_weak) && from_path.overlaps(&to_path) {
            return Err(ObserveError::AliasedEndpoints(format!(
                "{from_path} <-> {to_path}"
            )));
        }

        let suppress = config.suppress_reentrancy || two_way;
        let guard = Arc::new(PropagationGuard::new(suppress));
        let counters = Arc::new(Counters::default());
        let endpoint = |subject: &Weak<dyn Subject>, key_path: &KeyPath| Endpoint {
            subject: subject.clone(),
            key_path: key_path.clone(),
        };

        // Whichever direction observes the destination receives the echo of
        // a forward write. A one-way binder onto its own source path is its
        // own receiver.
        let self_bound = subject_addr(&from_weak) == subject_addr(&to_weak) && from_path == to_path;
        let forward_echo = if two_way {
            Some(Direction::Reverse)
        } else if suppress && self_bound {
            Some(Direction::Forward)
        } else {
            None
        };

        // The reverse side registers first so it sees the echo of the
        // initial forward write.
        let reverse = if two_way {
            Some(Observer::create_with_ref(
                to,
                to_key_path,
                ObservingOptions::NONE.with_new(),
                DeliveryContext::Immediate,
                propagation(
                    Direction::Reverse,
                    Some(Direction::Forward),
                    endpoint(&to_weak, &to_path),
                    endpoint(&from_weak, &from_path),
                    config.transform.clone(),
                    Arc::clone(&guard),
                    Arc::clone(&counters),
                ),
            )?)
        } else {
            None
        };

        let forward = Observer::create_with_ref(
            from,
            from_key_path,
            ObservingOptions::NONE.with_new().with_initial(),
            DeliveryContext::Immediate,
            propagation(
                Direction::Forward,
                forward_echo,
                endpoint(&from_weak, &from_path),
                endpoint(&to_weak, &to_path),
                config.transform.clone(),
                guard,
                Arc::clone(&counters),
            ),
        )?;

        debug!(from = %from_path, to = %to_path, mode = ?config.mode, transform = ?config.transform, "binder created");

        Ok(Self {
            inner: Arc::new(BinderInner {
                forward,
                reverse,
                from: from_weak,
                to: to_weak,
                mode: config.mode,
                counters,
            }),
        })
    }

    /// One-way binding without a transform.
    pub fn one_way<F: Subject, T: Subject>(
        from: &Arc<F>,
        from_key_path: &str,
        to: &Arc<T>,
        to_key_path: &str,
    ) -> Result<Self> {
        Self::create(from, from_key_path, to, to_key_path, BinderConfig::default())
    }

    /// Two-way binding through `transform`.
    pub fn two_way<F: Subject, T: Subject>(
        from: &Arc<F>,
        from_key_path: &str,
        to: &Arc<T>,
        to_key_path: &str,
        transform: Transform,
    ) -> Result<Self> {
        Self::create(
            from,
            from_key_path,
            to,
            to_key_path,
            BinderConfig {
                mode: BindingMode::TwoWay,
                transform,
                ..Default::default()
            },
        )
    }

    /// Stop both directions. Idempotent.
    pub fn stop_binding(&self) {
        self.inner.forward.stop();
        if let Some(reverse) = &self.inner.reverse {
            reverse.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.forward.is_active()
    }

    pub fn mode(&self) -> BindingMode {
        self.inner.mode
    }

    pub fn stats(&self) -> BindingStats {
        let counters = &self.inner.counters;
        BindingStats {
            forward: counters.forward.load(Ordering::Relaxed),
            reverse: counters.reverse.load(Ordering::Relaxed),
            suppressed: counters.suppressed.load(Ordering::Relaxed),
        }
    }

    /// True if `subject` is either end of this binding.
    pub fn involves<S: Subject>(&self, subject: &Arc<S>) -> bool {
        let addr = Arc::as_ptr(subject) as *const ();
        subject_addr(&self.inner.from) == addr || subject_addr(&self.inner.to) == addr
    }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("from", self.inner.forward.key_path())
            .field("mode", &self.inner.mode)
            .field("active", &self.is_active())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::PropertyObject;
    use serde_json::json;

    fn object(value: Value) -> Arc<PropertyObject> {
        Arc::new(PropertyObject::from_value(value).unwrap())
    }

    #[test]
    fn test_guard_suppresses_nested_propagation() {
        let guard = PropagationGuard::new(true);
        let mut nested = None;
        let outer = guard.propagate(true, || {
            nested = Some(guard.propagate(true, || {}));
        });
        assert!(outer);
        assert_eq!(nested, Some(false));
        assert!(guard.propagate(true, || {}));
    }

    #[test]
    fn test_guard_without_suppression_allows_nesting() {
        let guard = PropagationGuard::new(false);
        let mut nested = None;
        guard.propagate(true, || {
            nested = Some(guard.propagate(true, || {}));
        });
        assert_eq!(nested, Some(true));
    }

    #[test]
    fn test_echo_tracked_writes_skip_the_nesting_flag() {
        let guard = PropagationGuard::new(true);
        let mut nested = None;
        guard.propagate(false, || {
            nested = Some(guard.propagate(false, || {}));
        });
        assert_eq!(nested, Some(true));
    }

    #[test]
    fn test_echoes_are_consumed_once_in_order() {
        let guard = PropagationGuard::new(true);
        guard.expect_echo(Direction::Reverse, &json!(1));
        guard.expect_echo(Direction::Reverse, &json!(2));
        guard.expect_echo(Direction::Reverse, &json!(1));

        // Echoes are kept per receiving direction.
        assert!(!guard.take_echo(Direction::Forward, &json!(1)));

        assert!(guard.take_echo(Direction::Reverse, &json!(1)));
        assert!(guard.take_echo(Direction::Reverse, &json!(2)));
        assert!(!guard.take_echo(Direction::Reverse, &json!(2)));

        guard.forget_echo(Direction::Reverse, &json!(1));
        assert!(!guard.take_echo(Direction::Reverse, &json!(1)));
    }

    #[test]
    fn test_equal_value_is_still_written() {
        let from = object(json!({"x": 1}));
        let to = object(json!({"y": 1}));
        let writes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&writes);
        let _watch = Observer::observe(&to, "y")
            .no_args(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        let binder = Binder::two_way(&from, "x", &to, "y", Transform::None).unwrap();

        from.set("x", 1).unwrap();

        assert_eq!(writes.load(Ordering::Relaxed), 2);
        assert_eq!(binder.stats().forward, 2);
        assert_eq!(binder.stats().reverse, 0);
    }

    #[test]
    fn test_initial_write_leaves_no_echo_behind() {
        let from = object(json!({"x": 3}));
        let to = object(json!({"x": 0}));
        let binder = Binder::two_way(&from, "x", &to, "x", Transform::None).unwrap();
        assert_eq!(to.get("x").unwrap(), json!(3));

        // A later user write of the same value still flows back.
        from.set("x", 0).unwrap();
        to.set("x", 3).unwrap();
        assert_eq!(from.get("x").unwrap(), json!(3));
        assert_eq!(binder.stats().reverse, 1);
    }

    #[test]
    fn test_initial_value_is_propagated() {
        let from = object(json!({"name": "ada"}));
        let to = object(json!({}));
        let binder = Binder::one_way(&from, "name", &to, "label").unwrap();

        assert_eq!(to.get("label").unwrap(), json!("ada"));
        assert_eq!(binder.stats().forward, 1);
    }

    #[test]
    fn test_aliased_two_way_endpoints_rejected() {
        let model = object(json!({"a": {"b": 1}}));
        let result = Binder::two_way(&model, "a", &model, "a.b", Transform::None);
        assert!(matches!(result, Err(ObserveError::AliasedEndpoints(_))));
        assert_eq!(model.registration_count(), 0);

        // Distinct paths on one subject are fine.
        let model = object(json!({"x": 1, "y": 0}));
        let binder = Binder::two_way(&model, "x", &model, "y", Transform::None).unwrap();
        model.set("y", 5).unwrap();
        assert_eq!(model.get("x").unwrap(), json!(5));
        binder.stop_binding();
    }

    #[test]
    fn test_one_way_aliased_does_not_recurse() {
        let model = object(json!({"n": 1}));
        let binder = Binder::create(
            &model,
            "n",
            &model,
            "n",
            BinderConfig {
                transform: Transform::function(|v| json!(v.as_i64().unwrap_or(0) + 1)),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(model.get("n").unwrap(), json!(2));
        model.set("n", 10).unwrap();
        assert_eq!(model.get("n").unwrap(), json!(11));
        assert!(binder.stats().suppressed >= 2);
    }

    #[test]
    fn test_collection_change_propagates_whole_value() {
        let from = object(json!({"items": [1, 2]}));
        let to = object(json!({}));
        let _binder = Binder::one_way(&from, "items", &to, "copy").unwrap();

        from.insert("items", 2, 3).unwrap();
        assert_eq!(to.get("copy").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_involves() {
        let from = object(json!({"x": 1}));
        let to = object(json!({}));
        let other = object(json!({}));
        let binder = Binder::one_way(&from, "x", &to, "x").unwrap();

        assert!(binder.involves(&from));
        assert!(binder.involves(&to));
        assert!(!binder.involves(&other));
    }
}
