use crate::delivery::{CallbackQueue, DeliveryContext};
use crate::error::Result;
use crate::owner::{self, OwnerKey};
use crate::substrate::{Subject, SubjectRef};
use crate::types::{ChangeEvent, ObservingOptions};
use serde_json::Value;
use std::sync::Arc;

use super::callback::{Action, CallbackShape, Selector, ValueAction};
use super::handle::Observer;

/// Fluent construction of an [`Observer`], started by
/// [`Observer::observe`].
///
/// Each terminal method picks a callback shape and registers the observer.
pub struct ObserverBuilder {
    subject: SubjectRef,
    key_path: String,
    options: ObservingOptions,
    delivery: DeliveryContext,
    owner: Option<OwnerKey>,
    retained: bool,
}

impl Observer {
    /// Start building an observer of `key_path` on `subject`.
    pub fn observe<S: Subject>(subject: &Arc<S>, key_path: &str) -> ObserverBuilder {
        let subject: SubjectRef = subject.clone();
        ObserverBuilder {
            subject,
            key_path: key_path.to_string(),
            options: ObservingOptions::NONE,
            delivery: DeliveryContext::Immediate,
            owner: None,
            retained: false,
        }
    }
}

impl ObserverBuilder {
    /// Options to register with. Options the callback shape needs are
    /// added on top.
    pub fn options(mut self, options: ObservingOptions) -> Self {
        self.options = options;
        self
    }

    /// Deliver on `queue` instead of the notifying thread.
    pub fn on_queue(mut self, queue: &CallbackQueue) -> Self {
        self.delivery = DeliveryContext::Queued(queue.clone());
        self
    }

    /// Stop the observer when `owner` ends.
    pub fn owned_by(mut self, owner: impl Into<OwnerKey>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Keep the observer alive in [`ObserverStorage`](crate::ObserverStorage)
    /// until it is stopped.
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }

    /// Register with an explicit callback shape.
    pub fn build(self, callback: CallbackShape) -> Result<Observer> {
        let observer = Observer::create_with_ref(
            &self.subject,
            &self.key_path,
            self.options,
            self.delivery,
            callback,
        )?;
        if let Some(owner) = self.owner {
            owner::attach(observer.clone(), owner);
        }
        if self.retained {
            observer.retain();
        }
        Ok(observer)
    }

    pub fn no_args(self, f: impl Fn() + Send + Sync + 'static) -> Result<Observer> {
        self.build(CallbackShape::no_args(f))
    }

    pub fn value(self, f: impl Fn(Option<&Value>) + Send + Sync + 'static) -> Result<Observer> {
        self.build(CallbackShape::value_only(f))
    }

    pub fn old_and_new(
        self,
        f: impl Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    ) -> Result<Observer> {
        self.build(CallbackShape::old_and_new(f))
    }

    pub fn change(self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Result<Observer> {
        self.build(CallbackShape::change(f))
    }

    pub fn target_action<T: Send + Sync + 'static>(
        self,
        target: &Arc<T>,
        selector: Selector,
        action: Action<T>,
    ) -> Result<Observer> {
        self.build(CallbackShape::target_action(target, selector, action))
    }

    pub fn value_action<T: Send + Sync + 'static>(
        self,
        target: &Arc<T>,
        selector: Selector,
        action: ValueAction<T>,
    ) -> Result<Observer> {
        self.build(CallbackShape::value_action(target, selector, action))
    }
}
