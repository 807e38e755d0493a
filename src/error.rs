//! Centralized error handling for swizzle.
//!
//! Every failure in the engine is reported through [`SwizzleError`]; the library never panics.
//! This is enforced through `#![deny(clippy::panic)]` and `#![deny(clippy::unwrap_used)]`.
//!
//! ## Error Categories
//!
//! - **Collaborators** ([`SwizzleError::Io`], [`SwizzleError::Serialization`]): the file store
//!   and type dictionary snapshots.
//! - **Binary data** ([`SwizzleError::Format`], [`SwizzleError::InvalidEntityLength`],
//!   [`SwizzleError::InconsistentElementCount`], [`SwizzleError::ArrayLengthMismatch`]):
//!   entities that violate the wire format or the layout of their type.
//! - **Types** ([`SwizzleError::TypeNotPersistable`], [`SwizzleError::TypeNotHandled`],
//!   [`SwizzleError::TypeMismatch`]): handler derivation and lookup.
//! - **Schema evolution** ([`SwizzleError::UnsupportedSchemaEvolution`],
//!   [`SwizzleError::IncompatibleFieldKind`]): legacy type mapping.
//!
//! All errors are fatal to the single store or load call that raised them. The storer and the
//! loader clear their transient state before the error is returned, so the same instance can
//! be reused for the next call.
//!
//! ```rust
//! use swizzle::{Handle, Persistence, Persistable, SwizzleError};
//!
//! #[derive(Persistable)]
//! struct Counter {
//!     hits: u64,
//! }
//!
//! let (persistence, _store) = Persistence::in_memory()?;
//! match persistence.store(&Handle::new(Counter { hits: 3 })) {
//!     Ok(oid) => println!("stored as {oid}"),
//!     Err(SwizzleError::TypeNotPersistable { type_name, reason }) => {
//!         eprintln!("{type_name} cannot be stored: {reason}")
//!     }
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! # Ok::<(), SwizzleError>(())
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::graph::{Oid, Tid};

/// A specialized `Result` type for swizzle operations.
pub type Result<T> = std::result::Result<T, SwizzleError>;

/// The master error enum covering all failure domains in swizzle.
///
/// This type is `Clone` so that a failure can be recorded by one component and reported by
/// another. I/O errors are wrapped in `Arc` to keep cloning cheap.
#[derive(Debug, Clone)]
pub enum SwizzleError {
    /// Low-level I/O failure in a file-backed source or target.
    Io(Arc<io::Error>),

    /// A type dictionary or configuration snapshot could not be encoded or decoded.
    Serialization(String),

    /// Raw bytes do not form a sequence of well-formed entities.
    ///
    /// Raised for truncated headers, list blocks that overrun their entity and similar
    /// structural corruption.
    Format(String),

    /// No handler can be derived for a runtime type.
    TypeNotPersistable {
        /// The persistent name of the rejected type.
        type_name: String,
        /// Why derivation failed.
        reason: String,
    },

    /// An entity carries a type id that has neither a registered handler nor a legacy mapping.
    TypeNotHandled(Tid),

    /// A handler was asked to process an instance of a different runtime type.
    TypeMismatch {
        /// The type the handler or reference expected.
        expected: String,
        /// The type that was actually found.
        actual: String,
    },

    /// An entity's content length lies outside the `[min, max]` range of its type.
    InvalidEntityLength {
        /// Object id of the offending entity.
        oid: Oid,
        /// Content length found (header excluded).
        length: u64,
        /// Minimum content length of the type.
        min: u64,
        /// Maximum content length of the type.
        max: u64,
    },

    /// A fixed-capacity container cannot hold the persisted number of elements.
    ArrayLengthMismatch {
        /// Object id of the offending entity.
        oid: Oid,
        /// Element capacity of the live container.
        capacity: u64,
        /// Element count found in the persisted list.
        persisted: u64,
    },

    /// A legacy layout cannot be mapped onto the current layout automatically.
    UnsupportedSchemaEvolution {
        /// The current type name.
        type_name: String,
        /// Why the mapping was rejected.
        reason: String,
    },

    /// A legacy member and its current counterpart disagree on primitive versus reference.
    IncompatibleFieldKind {
        /// The current type name.
        type_name: String,
        /// The member name as found in the legacy layout.
        member: String,
        /// Kind of the legacy member.
        legacy: String,
        /// Kind of the current member.
        current: String,
    },

    /// An element source produced a different number of elements than announced in the
    /// list header that was already written.
    InconsistentElementCount {
        /// Count written to the list header.
        declared: u64,
        /// Count actually produced.
        actual: u64,
    },

    /// The source did not deliver an entity for a referenced object id.
    MissingObject(Oid),

    /// A non-nullable reference was decoded as the null object id.
    NullElement(String),

    /// The configuration is invalid.
    Configuration(String),

    /// Logic error inside the engine (poisoned lock, broken internal invariant).
    ///
    /// This should not occur in production. Please report it with a reproduction case.
    Internal(String),
}

impl fmt::Display for SwizzleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::TypeNotPersistable { type_name, reason } => {
                write!(f, "Type {type_name} is not persistable: {reason}")
            }
            Self::TypeNotHandled(tid) => write!(f, "No type handler for type id {tid}"),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {expected}, found {actual}")
            }
            Self::InvalidEntityLength {
                oid,
                length,
                min,
                max,
            } => write!(
                f,
                "Invalid entity length {length} for {oid}: allowed range is [{min}, {max}]"
            ),
            Self::ArrayLengthMismatch {
                oid,
                capacity,
                persisted,
            } => write!(
                f,
                "Array length mismatch for {oid}: capacity {capacity}, persisted {persisted}"
            ),
            Self::UnsupportedSchemaEvolution { type_name, reason } => {
                write!(f, "Unsupported schema evolution of {type_name}: {reason}")
            }
            Self::IncompatibleFieldKind {
                type_name,
                member,
                legacy,
                current,
            } => write!(
                f,
                "Incompatible kind for {type_name}.{member}: legacy {legacy}, current {current}"
            ),
            Self::InconsistentElementCount { declared, actual } => write!(
                f,
                "Inconsistent element count: header declares {declared}, source yielded {actual}"
            ),
            Self::MissingObject(oid) => write!(f, "Source did not deliver entity {oid}"),
            Self::NullElement(s) => write!(f, "Null reference where a value is required: {s}"),
            Self::Configuration(s) => write!(f, "Configuration Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for SwizzleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SwizzleError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Maps a poisoned lock into an [`SwizzleError::Internal`] naming the lock.
pub(crate) fn poisoned<G>(what: &'static str) -> impl FnOnce(std::sync::PoisonError<G>) -> SwizzleError {
    move |_| SwizzleError::Internal(format!("{what} lock poisoned"))
}
