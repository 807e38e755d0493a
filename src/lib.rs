//! # Swizzle
//!
//! Identity-preserving persistence for graphs of shared, mutable objects.
//!
//! ## Overview
//!
//! Swizzle stores an object graph as a flat sequence of binary *entities*, one per reachable
//! instance, and rebuilds the live graph from them. Shared references stay shared and cycles
//! stay cycles: every instance gets a persistent *object id* (oid), references are written as
//! oids, and on load every oid is turned back into exactly one live instance.
//!
//! ### Key Features
//!
//! *   **Identity preservation:** A shared identity registry maps oids to live instances across
//!     calls and threads. Storing an already known instance writes a reference, not a copy;
//!     loading an oid that is already live returns the live instance.
//! *   **Cycle safety:** Stores walk the graph iteratively over a pending chain; loads create
//!     every blank instance before any reference is resolved.
//! *   **Sharded output:** Entities are distributed over a power-of-two number of channels
//!     by `oid & (N - 1)`.
//! *   **Schema evolution:** Entities written under an older layout of a type are translated
//!     into the current layout on load, with numeric conversions and dropped members.
//! *   **Derived layouts:** `#[derive(Persistable)]` generates an explicit field layout for
//!     structs and enums; no runtime reflection is involved. Registering a type registers
//!     the types its fields name.
//! *   **Named roots:** A stored [`Roots`] value names the entry points of a storage;
//!     [`Persistence::load_initial`] rebuilds the graph from the latest one.
//! *   **Lazy references:** A [`Lazy`] field is written as an oid but only loaded on first
//!     access.
//!
//! ## Architecture
//!
//! ### Entity Format
//!
//! ```text
//! [8B totalLength] [8B typeId] [8B objectId] [content]
//! ```
//!
//! Content is a sequence of fixed primitives, 8-byte references and length-prefixed lists.
//! Reflective types place all references before all primitives so that reference traversal
//! never reads primitive bytes. See [`format`].
//!
//! ### Store Path
//!
//! A [`GraphStorer`] assigns oids, drains the pending chain, asks each instance's
//! [`handler::TypeHandler`] to write its entity into a [`chunk::ChunkBuffer`] and commits the
//! buffers to a [`io::Target`].
//!
//! ### Load Path
//!
//! A [`GraphLoader`] reads chunks from a [`io::Source`], creates blank instances, requests
//! referenced entities until the graph is closed, then populates and completes the
//! instances in encounter order.
//!
//! ## Usage
//!
//! ```rust
//! use swizzle::{Handle, Persistable, Persistence, Ref};
//!
//! #[derive(Persistable)]
//! struct Node {
//!     next: Ref<Node>,
//!     value: i64,
//! }
//!
//! let (persistence, store) = Persistence::in_memory()?;
//!
//! let a = Handle::new(Node { next: None, value: 1 });
//! let b = Handle::new(Node { next: Some(a.clone()), value: 2 });
//! a.write().next = Some(b.clone());
//! let oid = persistence.store(&a)?;
//!
//! // A second, independent instance over the same data rebuilds the cycle.
//! let reader = Persistence::builder()
//!     .storage(store.clone())
//!     .type_dictionary(persistence.type_dictionary()?)
//!     .build()?;
//! let loaded = reader.load::<Node>(oid)?;
//! let next = loaded.read().next.clone();
//! assert_eq!(next.as_ref().map(|n| n.read().value), Some(2));
//! # Ok::<(), swizzle::SwizzleError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Encapsulated Unsafe:** the only `unsafe` block is the memory map of [`io::FileStore`].
//! * **Comprehensive Errors:** All failures correspond to a [`SwizzleError`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// Lets derived code use `::swizzle::` paths inside this crate as well.
extern crate self as swizzle;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod chunk;
pub mod config;
pub mod element;
pub mod error;
pub mod format;
pub mod handler;
pub mod io;
pub mod layout;
pub mod legacy;
pub mod loader;
pub mod object;
pub mod registry;
pub mod storer;
pub mod traverse;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod graph;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
#[doc(hidden)]
pub mod rt;

// --- RE-EXPORTS ---

pub use api::{Persistence, PersistenceBuilder, PersistenceContext};
pub use config::{PersistenceConfig, StoreMode};
pub use element::{Element, Field};
pub use error::{Result, SwizzleError};
pub use graph::{Oid, Tid};
pub use handler::lazy::Lazy;
pub use handler::roots::Roots;
pub use io::{FileStore, MemoryStore, Source, Target};
pub use legacy::RefactoringMapping;
pub use loader::GraphLoader;
pub use object::{AnyRef, Handle, Instance, KeyRef, Persistable, Ref};
pub use registry::{ObjectRegistry, TypeDictionary, TypeRegistry};
pub use storer::GraphStorer;

// Re-export the derive macro so it is accessible as `swizzle::Persistable`
pub use swizzle_derive::Persistable;
