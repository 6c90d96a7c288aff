//! Binders: keep one key path in sync with another.
//!
//! A [`Binder`] is built from an observer on the source. Every change is
//! run through a [`Transform`] and written to the destination; a two-way
//! binder adds a second observer carrying changes back through the
//! transform's inverse. Writes a binder makes itself never bounce back
//! through the same binder.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_observers::{Binder, BinderConfig, Transform};
//!
//! let binder = Binder::create(&thermometer, "celsius", &display, "fahrenheit", BinderConfig {
//!     transform: Transform::invertible(
//!         |c| json!(c.as_f64().unwrap_or(0.0) * 9.0 / 5.0 + 32.0),
//!         |f| json!((f.as_f64().unwrap_or(32.0) - 32.0) * 5.0 / 9.0),
//!     ),
//!     ..Default::default()
//! })?;
//! ```

mod binding;
mod transform;

pub use binding::{Binder, BinderConfig, BindingMode, BindingStats};
pub use transform::{Formatter, IsNull, NegateBoolean, NumberFormatter, Transform, ValueTransformer};
