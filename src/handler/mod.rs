//! Type handlers: the per-type bridge between live values and entities.
//!
//! A [`TypeHandler`] knows the persisted layout of one type and implements the four steps of
//! its life cycle:
//!
//! 1. `store`: write one entity for an instance, turning references into object ids through
//!    an [`ObjectStorer`].
//! 2. `create`: allocate a blank instance from the entity header alone.
//! 3. `update`: populate the blank instance, resolving object ids through an
//!    [`ObjectResolver`]. Referenced instances may themselves still be blank.
//! 4. `complete`: optional, runs after every `update` of the batch. Hash-based collections
//!    insert their elements here, when every element has its final state.
//!
//! Handlers are immutable after construction and shared across threads.

use std::any::TypeId;
use std::fmt;
use std::sync::Weak;

use crate::api::PersistenceContext;
use crate::chunk::EntitySink;
use crate::element::Value;
use crate::error::{Result, SwizzleError};
use crate::format::EntityView;
use crate::graph::Oid;
use crate::layout::TypeDescription;
use crate::object::{Handle, Instance, Persistable};
use crate::registry::TypeRegistry;
use crate::traverse::ReferenceTraversal;

pub mod collections;
pub mod lazy;
pub mod native;
pub mod reflective;
pub mod roots;

pub use reflective::{LayoutBuilder, Reflective, ReflectiveHandler};

/// Turns referenced instances into object ids during a store call.
pub trait ObjectStorer {
    /// Returns the object id of `instance`, queueing it for storage if it is new.
    ///
    /// Instances already known to the shared registry are not stored again.
    fn apply(&mut self, instance: &Instance) -> Result<Oid>;

    /// Returns the object id of `instance`, queueing it for storage unless it was already
    /// stored in this call, even when the shared registry knows it.
    fn apply_eager(&mut self, instance: &Instance) -> Result<Oid>;
}

/// Turns object ids back into instances during a load call.
pub trait ObjectResolver {
    /// Resolves `oid`. The null id resolves to `None` without a lookup.
    fn resolve(&self, oid: Oid) -> Result<Option<Instance>>;

    /// The persistence instance lazy references load their targets from later.
    fn persistence(&self) -> Weak<PersistenceContext> {
        Weak::new()
    }
}

/// Work deferred from `update` to `complete`.
#[derive(Debug, Clone)]
pub enum PendingCompletion {
    /// Collection elements in persisted order.
    Elements(Vec<Value>),
    /// Map entries in persisted order.
    Entries(Vec<(Value, Value)>),
}

/// Per-type descriptor and behavior.
pub trait TypeHandler: Send + Sync + fmt::Debug {
    /// Persisted layout.
    fn description(&self) -> &TypeDescription;

    /// Compiled reference iterator of the layout.
    fn traversal(&self) -> &ReferenceTraversal;

    /// Runtime type handled.
    fn rust_type(&self) -> TypeId;

    /// Writes one entity for `instance`.
    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()>;

    /// Allocates a blank instance, sized only from what the entity header and list headers
    /// reveal. Never populates fields.
    fn create(&self, entity: &EntityView<'_>) -> Result<Instance>;

    /// Populates `instance` from the entity content.
    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>>;

    /// True if `complete` has work to do.
    fn requires_completion(&self) -> bool {
        false
    }

    /// Finishes `instance` after every instance of the batch has been updated.
    fn complete(
        &self,
        _entity: &EntityView<'_>,
        _instance: &Instance,
        _pending: Option<PendingCompletion>,
        _resolver: &dyn ObjectResolver,
    ) -> Result<()> {
        Ok(())
    }

    /// Registers every type the entities of this handler can reference. Called once, right
    /// after the handler is bound.
    fn register_dependencies(&self, _types: &TypeRegistry) -> Result<()> {
        Ok(())
    }

    /// Persistent type name.
    fn type_name(&self) -> &str {
        &self.description().type_name
    }

    /// Feeds every non-null object id in the entity to `acceptor`.
    fn iterate_references(
        &self,
        entity: &EntityView<'_>,
        acceptor: &mut dyn FnMut(Oid),
    ) -> Result<()> {
        self.traversal().iterate(entity.content(), acceptor)
    }

    /// Checks the entity's content length against the layout bounds.
    fn validate_length(&self, entity: &EntityView<'_>) -> Result<()> {
        let description = self.description();
        let length = entity.header().content_length();
        let (min, max) = (description.min_length(), description.max_length());
        if length < min || length > max {
            return Err(SwizzleError::InvalidEntityLength {
                oid: entity.oid(),
                length,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Recovers the typed handle of an instance handed to a handler.
pub fn expect_instance<T: Persistable>(instance: &Instance) -> Result<Handle<T>> {
    instance
        .downcast::<T>()
        .ok_or_else(|| SwizzleError::TypeMismatch {
            expected: T::type_name(),
            actual: instance.type_name(),
        })
}
