//! Lazy references.
//!
//! A [`Lazy<T>`] field persists as a plain object id, but loading its owner does not follow
//! it: the reference traversal sees an 8-byte primitive in its place. The loaded field keeps
//! the id and a weak link to the persistence instance that loaded it, and loads the target
//! graph on the first [`Lazy::get`].

use std::fmt;
use std::sync::{Mutex, MutexGuard, Weak};

use tracing::trace;

use crate::api::PersistenceContext;
use crate::element::{Element, Field, Value, reference_mismatch, typed};
use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter};
use crate::graph::Oid;
use crate::handler::{ObjectResolver, ObjectStorer};
use crate::layout::{MemberKind, PrimitiveKind};
use crate::loader::GraphLoader;
use crate::object::{Handle, Persistable};
use crate::registry::TypeRegistry;

/// An unresolved lazy reference as read from an entity.
#[derive(Clone)]
pub struct LazyLink {
    /// Object id of the target, null for a null reference.
    pub oid: Oid,
    context: Weak<PersistenceContext>,
}

impl fmt::Debug for LazyLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LazyLink({})", self.oid)
    }
}

struct LazyState<T: Persistable> {
    subject: Option<Handle<T>>,
    oid: Oid,
    context: Weak<PersistenceContext>,
}

/// A reference field whose target is loaded on first access.
pub struct Lazy<T: Persistable> {
    state: Mutex<LazyState<T>>,
}

impl<T: Persistable> Lazy<T> {
    /// A lazy reference to a live value.
    pub fn new(subject: Handle<T>) -> Self {
        Self::with_state(Some(subject), Oid::NULL, Weak::new())
    }

    /// A null lazy reference.
    pub fn empty() -> Self {
        Self::with_state(None, Oid::NULL, Weak::new())
    }

    fn with_state(
        subject: Option<Handle<T>>,
        oid: Oid,
        context: Weak<PersistenceContext>,
    ) -> Self {
        Self {
            state: Mutex::new(LazyState {
                subject,
                oid,
                context,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LazyState<T>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Object id of the target: assigned by the last store, or read by the load. Null for a
    /// value that was never stored.
    pub fn object_id(&self) -> Oid {
        self.lock().oid
    }

    /// The target if it is in memory, without loading it.
    pub fn peek(&self) -> Option<Handle<T>> {
        self.lock().subject.clone()
    }

    /// True if [`Lazy::get`] would not touch the source.
    pub fn is_loaded(&self) -> bool {
        let state = self.lock();
        state.subject.is_some() || state.oid.is_null()
    }

    /// The target, loading it and everything it references on first access.
    pub fn get(&self) -> Result<Option<Handle<T>>> {
        let mut state = self.lock();
        if let Some(subject) = &state.subject {
            return Ok(Some(subject.clone()));
        }
        let oid = state.oid;
        if oid.is_null() {
            return Ok(None);
        }
        let context = state.context.upgrade().ok_or_else(|| {
            SwizzleError::Configuration(format!(
                "lazy reference to {oid} outlived the persistence instance that loaded it"
            ))
        })?;
        let instance = GraphLoader::new(context)
            .load_object(oid)?
            .ok_or(SwizzleError::MissingObject(oid))?;
        let subject = typed::<T>(instance)?;
        trace!(%oid, type_name = %T::type_name(), "loaded lazy reference");
        state.subject = Some(subject.clone());
        Ok(Some(subject))
    }

    /// Replaces the target. The next store writes the new target.
    pub fn set(&self, subject: Option<Handle<T>>) {
        let mut state = self.lock();
        state.subject = subject;
        state.oid = Oid::NULL;
    }

    /// Drops the in-memory target so that the next [`Lazy::get`] loads it again. A target
    /// that was never stored is kept, since it could not be reloaded.
    pub fn clear(&self) -> Option<Handle<T>> {
        let mut state = self.lock();
        if state.oid.is_null() {
            return None;
        }
        state.subject.take()
    }
}

impl<T: Persistable> Default for Lazy<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Persistable> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Lazy")
            .field("oid", &state.oid)
            .field("loaded", &state.subject.is_some())
            .finish()
    }
}

impl<T: Persistable> Element for Lazy<T> {
    fn member_kind() -> MemberKind {
        MemberKind::Reference
    }

    // Not followed on load.
    fn traversed_kind() -> MemberKind {
        MemberKind::Primitive(PrimitiveKind::Long)
    }

    fn label() -> String {
        format!("Lazy<{}>", T::type_name())
    }

    fn register_types(types: &TypeRegistry) -> Result<()> {
        types.register::<T>().map(|_| ())
    }

    fn store(&self, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer) -> Result<()> {
        let mut state = self.lock();
        if let Some(subject) = state.subject.clone() {
            state.oid = storer.apply(&subject.to_instance())?;
        }
        out.put_oid(state.oid)
    }

    fn read_value(input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver) -> Result<Value> {
        Ok(Value::Deferred(LazyLink {
            oid: input.read_oid()?,
            context: resolver.persistence(),
        }))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Deferred(link) => Ok(Self::with_state(None, link.oid, link.context)),
            Value::Reference(None) => Ok(Self::empty()),
            Value::Reference(Some(instance)) => typed::<T>(instance).map(Self::new),
            other => reference_mismatch(Self::label(), &other),
        }
    }
}

impl<T: Persistable> Field for Lazy<T> {
    fn blank() -> Self {
        Self::empty()
    }
}
