//! # Key-Path Observers
//!
//! Observers and binders layered on a key-value change-notification
//! substrate.
//!
//! ## Core Concepts
//!
//! - **Subjects**: Objects whose properties are read, written and observed by key path
//! - **Observers**: One (subject, key path) subscription delivering to a callback
//! - **Storage**: A process-wide set keeping "fire and forget" observers alive
//! - **Owners**: Side-table tying observers and binders to an owner's lifetime
//! - **Binders**: Propagate a value from one key path to another, optionally transformed
//!
//! ## Example
//!
//! ```ignore
//! use keypath_observers::{Binder, Observer, PropertyObject};
//!
//! let account = Arc::new(PropertyObject::from_value(json!({"balance": 100}))?);
//! let label = Arc::new(PropertyObject::new());
//!
//! // Observe a key path
//! let observer = Observer::observe(&account, "balance")
//!     .old_and_new(|old, new| println!("{old:?} -> {new:?}"))?;
//!
//! // Keep another property in sync
//! let binder = Binder::one_way(&account, "balance", &label, "text")?;
//!
//! account.set("balance", 150)?;
//! ```

pub mod binder;
pub mod delivery;
pub mod error;
pub mod observer;
pub mod owner;
pub mod storage;
pub mod substrate;
pub mod types;

// Re-exports
pub use binder::{
    Binder, BinderConfig, BindingMode, BindingStats, Formatter, IsNull, NegateBoolean,
    NumberFormatter, Transform, ValueTransformer,
};
pub use delivery::{CallbackQueue, DeliveryContext, QueueConfig};
pub use error::{ObserveError, Result};
pub use observer::{Action, CallbackShape, Observer, ObserverBuilder, Selector, TargetBinding, ValueAction};
pub use owner::{Attachment, Lifetime, OwnerKey};
pub use storage::ObserverStorage;
pub use substrate::{ChangeHandler, PropertyObject, Subject, SubjectRef};
pub use types::{ChangeEvent, ChangeKind, KeyPath, ObserverId, ObservingOptions, SubscriptionToken};
