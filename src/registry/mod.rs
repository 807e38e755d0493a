//! Registries shared across store and load calls.
//!
//! - [`ObjectRegistry`]: object id ↔ live instance identity.
//! - [`TypeRegistry`]: runtime type and type id ↔ handler.
//! - [`TypeDictionary`]: type id ↔ persisted layout, current and legacy.

pub mod dictionary;
pub mod objects;
pub mod types;

pub use dictionary::TypeDictionary;
pub use objects::ObjectRegistry;
pub use types::{HandlerBinding, TypeRegistry, native_ids};
