//! Live instances and their identity.
//!
//! The engine persists graphs of shared, mutable values. A value lives in a [`Handle`], a
//! cheaply clonable pointer with identity semantics: two handles are equal only if they point
//! to the same allocation. Fields refer to other values through [`Ref<T>`] (nullable, typed),
//! [`AnyRef`] (nullable, type-erased) or [`KeyRef<T>`] (non-null, hashed by value).
//!
//! Internally every handle can be erased into an [`Instance`], which is what the storer, the
//! loader and the object registry work with.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::handler::TypeHandler;

/// A type that can be stored and loaded by the engine.
///
/// Usually derived with `#[derive(Persistable)]`. Built-in implementations cover primitives,
/// strings, time values, vectors, fixed arrays, sets and maps.
pub trait Persistable: Send + Sync + Sized + 'static {
    /// Stable, persistent name of the type. Legacy layouts are matched by this name.
    fn type_name() -> String;

    /// Derives the handler that reads and writes values of this type.
    fn create_handler() -> Result<Arc<dyn TypeHandler>>;
}

/// The shared cell behind a handle.
struct Slot<T> {
    value: RwLock<T>,
}

/// Object-safe view of a slot, used for type erasure.
trait Object: Send + Sync {
    fn rust_type(&self) -> TypeId;
    fn type_name(&self) -> String;
    fn create_handler(&self) -> Result<Arc<dyn TypeHandler>>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Persistable> Object for Slot<T> {
    fn rust_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> String {
        T::type_name()
    }

    fn create_handler(&self) -> Result<Arc<dyn TypeHandler>> {
        T::create_handler()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared pointer to a persistable value, compared by identity.
pub struct Handle<T: Persistable>(Arc<Slot<T>>);

/// A nullable typed reference field.
pub type Ref<T> = Option<Handle<T>>;

/// A nullable reference to a value of any persistable type.
pub type AnyRef = Option<Instance>;

impl<T: Persistable> Handle<T> {
    /// Wraps a value in a new, distinct handle.
    pub fn new(value: T) -> Self {
        Self(Arc::new(Slot {
            value: RwLock::new(value),
        }))
    }

    /// Locks the value for reading. A poisoned lock still yields the value.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.value.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Locks the value for writing. A poisoned lock still yields the value.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.value.write().unwrap_or_else(|p| p.into_inner())
    }

    /// True if both handles point to the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared value, stable for the handle's lifetime.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Erases the value type.
    pub fn to_instance(&self) -> Instance {
        Instance(self.0.clone())
    }
}

impl<T: Persistable> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Persistable> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: Persistable> Eq for Handle<T> {}

impl<T: Persistable> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T: Persistable> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({:#x})", T::type_name(), self.identity())
    }
}

impl<T: Persistable> From<Handle<T>> for Instance {
    fn from(handle: Handle<T>) -> Self {
        Instance(handle.0)
    }
}

/// A type-erased handle.
#[derive(Clone)]
pub struct Instance(Arc<dyn Object>);

impl Instance {
    /// Address of the shared value, the identity key of the object registry.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Runtime type of the value.
    pub fn rust_type(&self) -> TypeId {
        self.0.rust_type()
    }

    /// Persistent name of the value's type.
    pub fn type_name(&self) -> String {
        self.0.type_name()
    }

    /// True if the value is a `T`.
    pub fn is<T: Persistable>(&self) -> bool {
        self.rust_type() == TypeId::of::<T>()
    }

    /// Recovers the typed handle.
    pub fn downcast<T: Persistable>(&self) -> Option<Handle<T>> {
        self.0.clone().into_any().downcast::<Slot<T>>().ok().map(Handle)
    }

    /// True if both point to the same value.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.identity() == other.identity()
    }

    pub(crate) fn create_handler(&self) -> Result<Arc<dyn TypeHandler>> {
        self.0.create_handler()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>({:#x})", self.type_name(), self.identity())
    }
}

/// A non-null reference whose hashing and ordering follow the referenced value.
///
/// Sets and maps keyed by `KeyRef` can only be rebuilt once every referenced value has been
/// populated, which is why their handlers defer insertion to the completion phase.
pub struct KeyRef<T: Persistable>(Handle<T>);

impl<T: Persistable> KeyRef<T> {
    /// Wraps a handle.
    pub fn new(handle: Handle<T>) -> Self {
        Self(handle)
    }

    /// The referenced handle.
    pub fn handle(&self) -> &Handle<T> {
        &self.0
    }

    /// Unwraps the handle.
    pub fn into_handle(self) -> Handle<T> {
        self.0
    }
}

impl<T: Persistable> Clone for KeyRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Persistable + PartialEq> PartialEq for KeyRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0) || *self.0.read() == *other.0.read()
    }
}

impl<T: Persistable + Eq> Eq for KeyRef<T> {}

impl<T: Persistable + Hash> Hash for KeyRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.read().hash(state);
    }
}

impl<T: Persistable + PartialOrd> PartialOrd for KeyRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0.ptr_eq(&other.0) {
            return Some(Ordering::Equal);
        }
        self.0.read().partial_cmp(&*other.0.read())
    }
}

impl<T: Persistable + Ord> Ord for KeyRef<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.ptr_eq(&other.0) {
            return Ordering::Equal;
        }
        self.0.read().cmp(&*other.0.read())
    }
}

impl<T: Persistable> fmt::Debug for KeyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyRef({:?})", self.0)
    }
}
