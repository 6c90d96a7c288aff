//! Observer lifecycle: registration, dispatch and teardown.

use crate::delivery::{DeliveryContext, SerialLane};
use crate::error::{ObserveError, Result};
use crate::storage::ObserverStorage;
use crate::substrate::{subject_addr, ChangeHandler, Subject, SubjectRef};
use crate::types::{ChangeEvent, KeyPath, ObserverId, ObservingOptions, SubscriptionToken};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::callback::{CallbackShape, Delivery};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Where an observer stands with its subject.
enum Registration {
    Pending,
    Active(SubscriptionToken),
    Stopped,
}

struct ObserverInner {
    id: ObserverId,
    subject: Weak<dyn Subject>,
    key_path: KeyPath,
    /// Effective options after the callback shape's requirements.
    options: ObservingOptions,
    /// `None` runs callbacks on the notifying thread.
    lane: Option<SerialLane>,
    callback: Arc<CallbackShape>,
    /// Goes true -> false exactly once.
    active: AtomicBool,
    registration: Mutex<Registration>,
    /// Held while handing a change to the callback or the queue, so one
    /// observer's changes are dispatched one at a time and in order.
    dispatch: ReentrantMutex<()>,
}

impl ObserverInner {
    fn register(self: &Arc<Self>, subject: &SubjectRef) -> Result<()> {
        let mut registration = self.registration.lock();
        if !matches!(*registration, Registration::Pending) {
            return Err(ObserveError::AlreadyRegistered(self.id));
        }

        let observer = Arc::downgrade(self);
        let handler: ChangeHandler = Arc::new(move |change: &ChangeEvent| {
            if let Some(observer) = observer.upgrade() {
                observer.deliver(change);
            }
        });
        let options = ObservingOptions {
            initial: false,
            ..self.options
        };
        let token = subject.register(&self.key_path, options, handler)?;
        *registration = Registration::Active(token);

        debug!(observer = %self.id, key_path = %self.key_path, ?token, "observer registered");
        Ok(())
    }

    fn deliver(&self, change: &ChangeEvent) {
        let _order = self.dispatch.lock();
        if !self.active.load(Ordering::Acquire) {
            trace!(observer = %self.id, "change after stop dropped");
            return;
        }

        let delivery = Delivery {
            subject: self.subject.clone(),
            key_path: self.key_path.clone(),
            change: change.clone(),
        };
        match &self.lane {
            None => self.callback.invoke(&delivery),
            Some(lane) => {
                let callback = Arc::clone(&self.callback);
                lane.submit(Box::new(move || callback.invoke(&delivery)));
            }
        }
    }

    fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let previous = std::mem::replace(&mut *self.registration.lock(), Registration::Stopped);
        if let Registration::Active(token) = previous {
            match self.subject.upgrade() {
                Some(subject) => subject.unregister(token),
                None => trace!(observer = %self.id, "subject already gone, nothing to unregister"),
            }
        }
        debug!(observer = %self.id, key_path = %self.key_path, "observer stopped");

        ObserverStorage::release(self.id);
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A single (subject, key path) subscription delivering changes to a
/// [`CallbackShape`].
///
/// The subject and any target are held weakly. Cloning an `Observer` shares
/// the same subscription; it stops when [`stop`](Self::stop) is called or
/// when the last handle (including one held by
/// [`ObserverStorage`] or an owner [`Lifetime`](crate::owner::Lifetime)) is
/// dropped.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    /// Observe `key_path` on `subject`.
    ///
    /// Options the callback shape needs are added to `options`. With
    /// `options.initial` the callback runs once on the calling thread with
    /// the current value before this returns, whatever the delivery context.
    pub fn create<S: Subject>(
        subject: &Arc<S>,
        key_path: &str,
        options: ObservingOptions,
        delivery: DeliveryContext,
        callback: CallbackShape,
    ) -> Result<Self> {
        let subject: SubjectRef = subject.clone();
        Self::create_with_ref(&subject, key_path, options, delivery, callback)
    }

    /// [`create`](Self::create) for a type-erased subject.
    pub fn create_with_ref(
        subject: &SubjectRef,
        key_path: &str,
        options: ObservingOptions,
        delivery: DeliveryContext,
        callback: CallbackShape,
    ) -> Result<Self> {
        let key_path = KeyPath::parse(key_path)?;
        callback.validate()?;

        let options = options.union(callback.required_options());
        let lane = match delivery {
            DeliveryContext::Immediate => None,
            DeliveryContext::Queued(queue) => Some(SerialLane::new(queue)),
        };
        let inner = Arc::new(ObserverInner {
            id: ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::SeqCst)),
            subject: Arc::downgrade(subject),
            key_path,
            options,
            lane,
            callback: Arc::new(callback),
            active: AtomicBool::new(true),
            registration: Mutex::new(Registration::Pending),
            dispatch: ReentrantMutex::new(()),
        });

        {
            // Changes racing the registration wait until the initial call
            // has been made.
            let _order = inner.dispatch.lock();
            inner.register(subject)?;

            if options.initial {
                let current = subject.value_for_key_path(&inner.key_path)?;
                inner.callback.invoke(&Delivery {
                    subject: inner.subject.clone(),
                    key_path: inner.key_path.clone(),
                    change: ChangeEvent::initial(current),
                });
            }
        }

        Ok(Self { inner })
    }

    /// Stop observing. Idempotent and safe after the subject is gone.
    ///
    /// A callback already queued on a [`CallbackQueue`](crate::CallbackQueue)
    /// may still run once after this returns.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn id(&self) -> ObserverId {
        self.inner.id
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.inner.key_path
    }

    /// Options actually registered, including forced ones.
    pub fn options(&self) -> ObservingOptions {
        self.inner.options
    }

    /// The observed subject, if it is still alive.
    pub fn subject(&self) -> Option<SubjectRef> {
        self.inner.subject.upgrade()
    }

    /// True if this observer watches `subject`.
    pub fn observes<S: Subject>(&self, subject: &Arc<S>) -> bool {
        subject_addr(&self.inner.subject) == Arc::as_ptr(subject) as *const ()
    }

    /// Keep this observer alive without holding a handle. It stays
    /// registered until [`stop`](Self::stop) is called.
    pub fn retain(&self) {
        ObserverStorage::retain(self);
    }

    #[cfg(test)]
    fn register_again(&self) -> Result<()> {
        let subject = self.subject().ok_or(ObserveError::SubjectDeallocated)?;
        self.inner.register(&subject)
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.inner.id)
            .field("key_path", &self.inner.key_path)
            .field("callback", &self.inner.callback)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::CallbackQueue;
    use crate::substrate::PropertyObject;
    use serde_json::{json, Value};

    fn account() -> Arc<PropertyObject> {
        Arc::new(PropertyObject::from_value(json!({"balance": 100})).unwrap())
    }

    fn collect() -> (CallbackShape, Arc<Mutex<Vec<ChangeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let shape = CallbackShape::change(move |change| sink.lock().push(change.clone()));
        (shape, events)
    }

    #[test]
    fn test_old_and_new_callback() {
        let account = account();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::old_and_new(move |old, new| {
                sink.lock().push((old.cloned(), new.cloned()));
            }),
        )
        .unwrap();

        account.set("balance", 150).unwrap();

        assert_eq!(*seen.lock(), vec![(Some(json!(100)), Some(json!(150)))]);
    }

    #[test]
    fn test_shape_forces_options() {
        let account = account();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE.with_prior(),
            DeliveryContext::Immediate,
            CallbackShape::old_and_new(|_, _| {}),
        )
        .unwrap();

        let options = observer.options();
        assert!(options.old && options.new && options.prior);
    }

    #[test]
    fn test_invalid_key_path_fails_before_registering() {
        let account = account();
        let result = Observer::create(
            &account,
            "balance..cents",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::no_args(|| {}),
        );
        assert!(matches!(result, Err(ObserveError::InvalidKeyPath(_))));
        assert_eq!(account.registration_count(), 0);
    }

    #[test]
    fn test_initial_fires_synchronously_even_when_queued() {
        let account = account();
        let queue = CallbackQueue::manual("initial");
        let (shape, events) = collect();

        let _observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE.with_new().with_initial(),
            DeliveryContext::Queued(queue.clone()),
            shape,
        )
        .unwrap();

        assert_eq!(*events.lock(), vec![ChangeEvent::initial(json!(100))]);

        account.set("balance", 120).unwrap();
        assert_eq!(events.lock().len(), 1);
        assert_eq!(queue.drain(), 1);
        assert_eq!(events.lock()[1].new, Some(json!(120)));
    }

    #[test]
    fn test_stop_is_idempotent_and_unregisters_once() {
        let account = account();
        let (shape, events) = collect();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            shape,
        )
        .unwrap();

        observer.stop();
        observer.stop();
        observer.stop();
        account.set("balance", 1).unwrap();

        assert!(!observer.is_active());
        assert!(events.lock().is_empty());
        assert_eq!(account.unregister_count(), 1);
    }

    #[test]
    fn test_drop_stops() {
        let account = account();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::no_args(|| {}),
        )
        .unwrap();
        let clone = observer.clone();

        drop(observer);
        assert_eq!(account.registration_count(), 1);
        drop(clone);
        assert_eq!(account.registration_count(), 0);
        assert_eq!(account.unregister_count(), 1);
    }

    #[test]
    fn test_stop_after_subject_dropped() {
        let account = account();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::no_args(|| {}),
        )
        .unwrap();

        drop(account);
        assert!(observer.subject().is_none());
        observer.stop();
        assert!(!observer.is_active());
    }

    #[test]
    fn test_double_registration_is_a_fault() {
        let account = account();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::no_args(|| {}),
        )
        .unwrap();

        assert!(matches!(
            observer.register_again(),
            Err(ObserveError::AlreadyRegistered(id)) if id == observer.id()
        ));
        observer.stop();
        assert!(observer.register_again().is_err());
        assert_eq!(account.registration_count(), 0);
    }

    #[test]
    fn test_queued_delivery_may_run_after_stop() {
        let account = account();
        let queue = CallbackQueue::manual("late");
        let (shape, events) = collect();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE.with_new(),
            DeliveryContext::Queued(queue.clone()),
            shape,
        )
        .unwrap();

        account.set("balance", 1).unwrap();
        observer.stop();
        account.set("balance", 2).unwrap();

        assert_eq!(queue.drain(), 1);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new, Some(Value::from(1)));
    }

    #[test]
    fn test_observes_identity() {
        let account = account();
        let other = self::account();
        let observer = Observer::create(
            &account,
            "balance",
            ObservingOptions::NONE,
            DeliveryContext::Immediate,
            CallbackShape::no_args(|| {}),
        )
        .unwrap();

        assert!(observer.observes(&account));
        assert!(!observer.observes(&other));
    }
}
