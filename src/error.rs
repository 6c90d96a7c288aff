//! Error types for observers and binders.

use crate::types::ObserverId;
use thiserror::Error;

/// Main error type for observer and binder operations.
///
/// Every variant except `Io` is a programming-error fault: it is reported
/// when an observer or binder is constructed and never from the delivery
/// path.
#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key path: {0:?}")]
    InvalidKeyPath(String),

    #[error("Selector {selector} declares {declared} argument(s), action takes {required}")]
    InvalidSelectorArity {
        selector: String,
        declared: usize,
        required: usize,
    },

    #[error("Observer {0} is already registered")]
    AlreadyRegistered(ObserverId),

    #[error("Two-way binding needs a reversible transform")]
    IrreversibleTransform,

    #[error("Two-way binding endpoints alias the same property: {0}")]
    AliasedEndpoints(String),

    #[error("Subject has been deallocated")]
    SubjectDeallocated,

    #[error("Value at {0:?} is not a collection")]
    NotACollection(String),

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for observer and binder operations.
pub type Result<T> = std::result::Result<T, ObserveError>;
