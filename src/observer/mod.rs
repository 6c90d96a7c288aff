//! Key-path observers.
//!
//! An [`Observer`] watches one key path on one subject and hands each change
//! to a [`CallbackShape`]: a plain closure, a closure over the change, or a
//! weakly held target with an action of declared arity.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_observers::{Observer, PropertyObject};
//!
//! let account = Arc::new(PropertyObject::from_value(json!({"balance": 100}))?);
//! let observer = Observer::observe(&account, "balance")
//!     .old_and_new(|old, new| println!("balance {old:?} -> {new:?}"))?;
//!
//! account.set("balance", 150)?; // prints "balance Some(100) -> Some(150)"
//! observer.stop();
//! ```

mod builder;
mod callback;
mod handle;

pub use builder::ObserverBuilder;
pub use callback::{Action, CallbackShape, Selector, TargetBinding, ValueAction};
pub use handle::Observer;
