//! The closed set of callback shapes an observer can deliver to.

use crate::error::{ObserveError, Result};
use crate::substrate::{Subject, SubjectRef};
use crate::types::{ChangeEvent, KeyPath, ObservingOptions};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Everything a callback shape may need from one change.
pub(crate) struct Delivery {
    pub(crate) subject: Weak<dyn Subject>,
    pub(crate) key_path: KeyPath,
    pub(crate) change: ChangeEvent,
}

/// Declared signature of a target-action callback: a name and the number
/// of arguments the action takes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    name: String,
    arity: usize,
}

impl Selector {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }

    /// Build from a colon-labelled signature such as
    /// `"balanceChanged:keyPath:"`; the arity is the number of colons.
    pub fn from_signature(signature: &str) -> Self {
        Self {
            name: signature.to_string(),
            arity: signature.matches(':').count(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

type Target0<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Target1<T> = Arc<dyn Fn(&T, &SubjectRef) + Send + Sync>;
type Target2<T> = Arc<dyn Fn(&T, &SubjectRef, &KeyPath) + Send + Sync>;
type Target3<T> = Arc<dyn Fn(&T, &SubjectRef, &KeyPath, &ChangeEvent) + Send + Sync>;
type Target4<T> =
    Arc<dyn Fn(&T, &SubjectRef, &KeyPath, Option<&Value>, Option<&Value>) + Send + Sync>;

/// A target-action callback taking 0 to 4 arguments after the target:
///
/// - 0: `target.action()`
/// - 1: `target.action(object)`
/// - 2: `target.action(object, key_path)`
/// - 3: `target.action(object, key_path, change)`
/// - 4: `target.action(object, key_path, old, new)` (forces old and new)
pub enum Action<T> {
    Zero(Target0<T>),
    One(Target1<T>),
    Two(Target2<T>),
    Three(Target3<T>),
    Four(Target4<T>),
}

impl<T> Action<T> {
    pub fn zero(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Action::Zero(Arc::new(f))
    }

    pub fn one(f: impl Fn(&T, &SubjectRef) + Send + Sync + 'static) -> Self {
        Action::One(Arc::new(f))
    }

    pub fn two(f: impl Fn(&T, &SubjectRef, &KeyPath) + Send + Sync + 'static) -> Self {
        Action::Two(Arc::new(f))
    }

    pub fn three(
        f: impl Fn(&T, &SubjectRef, &KeyPath, &ChangeEvent) + Send + Sync + 'static,
    ) -> Self {
        Action::Three(Arc::new(f))
    }

    pub fn four(
        f: impl Fn(&T, &SubjectRef, &KeyPath, Option<&Value>, Option<&Value>)
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Action::Four(Arc::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            Action::Zero(_) => 0,
            Action::One(_) => 1,
            Action::Two(_) => 2,
            Action::Three(_) => 3,
            Action::Four(_) => 4,
        }
    }
}

type Value1<T> = Arc<dyn Fn(&T, Option<&Value>) + Send + Sync>;
type Value2<T> = Arc<dyn Fn(&T, Option<&Value>, Option<&Value>) + Send + Sync>;
type Value3<T> = Arc<dyn Fn(&T, &SubjectRef, Option<&Value>, Option<&Value>) + Send + Sync>;

/// A target-action callback that receives values rather than the change:
///
/// - 1: `target.action(new)`
/// - 2: `target.action(old, new)`
/// - 3: `target.action(object, old, new)`
pub enum ValueAction<T> {
    New(Value1<T>),
    OldAndNew(Value2<T>),
    ObjectOldAndNew(Value3<T>),
}

impl<T> ValueAction<T> {
    pub fn new_value(f: impl Fn(&T, Option<&Value>) + Send + Sync + 'static) -> Self {
        ValueAction::New(Arc::new(f))
    }

    pub fn old_and_new(
        f: impl Fn(&T, Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    ) -> Self {
        ValueAction::OldAndNew(Arc::new(f))
    }

    pub fn object_old_and_new(
        f: impl Fn(&T, &SubjectRef, Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    ) -> Self {
        ValueAction::ObjectOldAndNew(Arc::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            ValueAction::New(_) => 1,
            ValueAction::OldAndNew(_) => 2,
            ValueAction::ObjectOldAndNew(_) => 3,
        }
    }
}

/// A target-action callback with the target type erased. The target is
/// held weakly and resolved on every call.
pub struct TargetBinding {
    selector: Selector,
    arity: usize,
    options: ObservingOptions,
    invoke: Arc<dyn Fn(&Delivery) + Send + Sync>,
}

impl TargetBinding {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    fn validate(&self) -> Result<()> {
        if self.selector.arity() != self.arity {
            return Err(ObserveError::InvalidSelectorArity {
                selector: self.selector.name().to_string(),
                declared: self.selector.arity(),
                required: self.arity,
            });
        }
        Ok(())
    }
}

/// How an observer hands a change to its callback.
pub enum CallbackShape {
    /// `f()`
    NoArgs(Arc<dyn Fn() + Send + Sync>),
    /// `f(new)`
    ValueOnly(Arc<dyn Fn(Option<&Value>) + Send + Sync>),
    /// `f(old, new)`; forces old and new.
    OldAndNew(Arc<dyn Fn(Option<&Value>, Option<&Value>) + Send + Sync>),
    /// `f(change)`
    ChangeDict(Arc<dyn Fn(&ChangeEvent) + Send + Sync>),
    /// A weakly held target and an [`Action`].
    TargetAction(TargetBinding),
    /// A weakly held target and a [`ValueAction`].
    ValueAction(TargetBinding),
}

impl CallbackShape {
    pub fn no_args(f: impl Fn() + Send + Sync + 'static) -> Self {
        CallbackShape::NoArgs(Arc::new(f))
    }

    pub fn value_only(f: impl Fn(Option<&Value>) + Send + Sync + 'static) -> Self {
        CallbackShape::ValueOnly(Arc::new(f))
    }

    pub fn old_and_new(f: impl Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static) -> Self {
        CallbackShape::OldAndNew(Arc::new(f))
    }

    pub fn change(f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        CallbackShape::ChangeDict(Arc::new(f))
    }

    /// Call `action` on `target` for every change. `selector` declares the
    /// action's arity and must agree with it.
    pub fn target_action<T>(target: &Arc<T>, selector: Selector, action: Action<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let arity = action.arity();
        let options = if arity == 4 {
            ObservingOptions::OLD_AND_NEW
        } else {
            ObservingOptions::NONE
        };
        let target = Arc::downgrade(target);
        let name = selector.name().to_string();

        let invoke = move |delivery: &Delivery| {
            let Some(target) = target.upgrade() else {
                trace!(selector = %name, "target deallocated, skipping action");
                return;
            };
            if let Action::Zero(f) = &action {
                f(&target);
                return;
            }
            let Some(object) = delivery.subject.upgrade() else {
                trace!(selector = %name, "subject deallocated, skipping action");
                return;
            };
            let change = &delivery.change;
            match &action {
                Action::Zero(_) => {}
                Action::One(f) => f(&target, &object),
                Action::Two(f) => f(&target, &object, &delivery.key_path),
                Action::Three(f) => f(&target, &object, &delivery.key_path, change),
                Action::Four(f) => f(
                    &target,
                    &object,
                    &delivery.key_path,
                    change.old.as_ref(),
                    change.new.as_ref(),
                ),
            }
        };

        CallbackShape::TargetAction(TargetBinding {
            selector,
            arity,
            options,
            invoke: Arc::new(invoke),
        })
    }

    /// Call a value `action` on `target` for every change. `selector`
    /// declares the action's arity and must agree with it.
    pub fn value_action<T>(target: &Arc<T>, selector: Selector, action: ValueAction<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let arity = action.arity();
        let options = match arity {
            1 => ObservingOptions::NONE.with_new(),
            _ => ObservingOptions::OLD_AND_NEW,
        };
        let target = Arc::downgrade(target);
        let name = selector.name().to_string();

        let invoke = move |delivery: &Delivery| {
            let Some(target) = target.upgrade() else {
                trace!(selector = %name, "target deallocated, skipping value action");
                return;
            };
            let old = delivery.change.old.as_ref();
            let new = delivery.change.new.as_ref();
            match &action {
                ValueAction::New(f) => f(&target, new),
                ValueAction::OldAndNew(f) => f(&target, old, new),
                ValueAction::ObjectOldAndNew(f) => match delivery.subject.upgrade() {
                    Some(object) => f(&target, &object, old, new),
                    None => trace!(selector = %name, "subject deallocated, skipping value action"),
                },
            }
        };

        CallbackShape::ValueAction(TargetBinding {
            selector,
            arity,
            options,
            invoke: Arc::new(invoke),
        })
    }

    /// Options this shape needs regardless of what the caller asked for.
    pub fn required_options(&self) -> ObservingOptions {
        match self {
            CallbackShape::NoArgs(_) | CallbackShape::ChangeDict(_) => ObservingOptions::NONE,
            CallbackShape::ValueOnly(_) => ObservingOptions::NONE.with_new(),
            CallbackShape::OldAndNew(_) => ObservingOptions::OLD_AND_NEW,
            CallbackShape::TargetAction(binding) | CallbackShape::ValueAction(binding) => {
                binding.options
            }
        }
    }

    /// Check target-action arity against the declared selector.
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            CallbackShape::TargetAction(binding) | CallbackShape::ValueAction(binding) => {
                binding.validate()
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn invoke(&self, delivery: &Delivery) {
        let change = &delivery.change;
        match self {
            CallbackShape::NoArgs(f) => f(),
            CallbackShape::ValueOnly(f) => f(change.new.as_ref()),
            CallbackShape::OldAndNew(f) => f(change.old.as_ref(), change.new.as_ref()),
            CallbackShape::ChangeDict(f) => f(change),
            CallbackShape::TargetAction(binding) | CallbackShape::ValueAction(binding) => {
                (binding.invoke)(delivery)
            }
        }
    }
}

impl fmt::Debug for CallbackShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackShape::NoArgs(_) => f.write_str("NoArgs"),
            CallbackShape::ValueOnly(_) => f.write_str("ValueOnly"),
            CallbackShape::OldAndNew(_) => f.write_str("OldAndNew"),
            CallbackShape::ChangeDict(_) => f.write_str("ChangeDict"),
            CallbackShape::TargetAction(b) => write!(f, "TargetAction({}/{})", b.selector, b.arity),
            CallbackShape::ValueAction(b) => write!(f, "ValueAction({}/{})", b.selector, b.arity),
        }
    }
}
