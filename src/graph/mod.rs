//! Identifiers and the transient item tables of store and load calls.
//!
//! Items never escape the call that created them: a [`StoreChain`] is drained and cleared by
//! every commit, a [`BuildTable`] is cleared before every load returns.

/// Build items of the load path.
pub mod build;
/// Defines the `Oid` and `Tid` types.
pub mod id;
/// Store items of the store path.
pub mod store;

pub use build::{BuildItem, BuildTable, EntityLocation};
pub use id::{Oid, Tid};
pub use store::{StoreChain, StoreItem};
