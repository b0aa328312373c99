//! Error kinds shared by every layer (§7).
//!
//! Inner layers raise the most specific variant they can; outer layers are
//! expected to enrich (not replace) the error by wrapping the location and
//! operation name into the message, per §7's "inner signals, outer enriches"
//! policy.

use thiserror::Error;

use crate::location::Location;

/// The result type returned by every fallible operation in this crate.
pub type StoreResult<T> = Result<T, StoreError>;

/// The error kinds of §7.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Illegal argument: wrong element type for a position, a non-slot used
    /// as a slot, a write attempted in a read-only/write-only mode, etc.
    #[error("usage error in {operation}: {message}")]
    Usage {
        operation: &'static str,
        message: String,
    },

    /// A structural invariant of the knowledge base has been violated
    /// (dangling pointer, missing subslot list, a partition hash referenced
    /// but absent). Non-recoverable for the running process; reportable by
    /// a future offline fsck.
    #[error("invariant violated at {location:?}: {message}")]
    Invariant { location: Location, message: String },

    /// A Basic Theo2 (L2) constraint failed: cardinality, domain, or range.
    #[error("schema violation at {location:?}: {message}")]
    Schema { location: Location, message: String },

    /// The addressed thing does not exist.
    #[error("not found: {location:?}")]
    NotFound { location: Location },

    /// A mutation was attempted against a knowledge base opened read-only.
    #[error("attempted to mutate a read-only knowledge base at {operation}")]
    ReadOnly { operation: &'static str },

    /// Propagated from the underlying map / filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn usage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Usage {
            operation,
            message: message.into(),
        }
    }

    pub fn invariant(location: Location, message: impl Into<String>) -> Self {
        Self::Invariant {
            location,
            message: message.into(),
        }
    }

    pub fn schema(location: Location, message: impl Into<String>) -> Self {
        Self::Schema {
            location,
            message: message.into(),
        }
    }

    pub fn not_found(location: Location) -> Self {
        Self::NotFound { location }
    }

    pub fn read_only(operation: &'static str) -> Self {
        Self::ReadOnly { operation }
    }
}
