//! The type handler registry.
//!
//! Maps runtime types and type ids to handlers. Native types are bound at construction with
//! fixed ids; every other type is derived on first use (or explicitly through
//! [`TypeRegistry::register`]) and receives an id from the type dictionary. Registering a
//! type also registers the types its fields and elements reference, so a reader only needs
//! to name its root types. Handlers are cached for the registry's lifetime.
//!
//! Type ids found in data but not bound to a current handler are resolved through the
//! dictionary: if the id names an older layout of a registered type, a legacy handler is
//! built once and cached.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::error::{Result, SwizzleError, poisoned};
use crate::graph::Tid;
use crate::handler::TypeHandler;
use crate::handler::roots::Roots;
use crate::legacy::{LegacyTypeHandler, LegacyTypeMapper, RefactoringMapping};
use crate::object::{AnyRef, Instance, Persistable};
use crate::registry::TypeDictionary;

/// Fixed type ids of the native handlers.
pub mod native_ids {
    /// `bool`
    pub const BOOL: u64 = 10;
    /// `i8`
    pub const I8: u64 = 11;
    /// `u8`
    pub const U8: u64 = 12;
    /// `i16`
    pub const I16: u64 = 13;
    /// `u16`
    pub const U16: u64 = 14;
    /// `i32`
    pub const I32: u64 = 15;
    /// `u32`
    pub const U32: u64 = 16;
    /// `i64`
    pub const I64: u64 = 17;
    /// `u64`
    pub const U64: u64 = 18;
    /// `f32`
    pub const F32: u64 = 19;
    /// `f64`
    pub const F64: u64 = 20;
    /// `char`
    pub const CHAR: u64 = 21;
    /// `String`
    pub const STRING: u64 = 30;
    /// `Vec<bool>`, first of the primitive arrays (`Vec<bool>` .. `Vec<char>`).
    pub const VEC_BOOL: u64 = 40;
    /// `Duration`
    pub const DURATION: u64 = 60;
    /// `SystemTime`
    pub const SYSTEM_TIME: u64 = 61;
    /// `()`, the stateless marker.
    pub const UNIT: u64 = 62;
    /// `Vec<AnyRef>`
    pub const ANY_LIST: u64 = 63;
    /// `Roots`, the named entry points of a storage.
    pub const ROOTS: u64 = 64;
    /// Upper bound (exclusive) of the reserved native range.
    pub const RESERVED: u64 = 1_000;
}

/// A handler together with the type id it writes.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    /// Type id written into entity headers.
    pub tid: Tid,
    /// The handler.
    pub handler: Arc<dyn TypeHandler>,
}

#[derive(Debug, Default)]
struct TypeState {
    by_rust_type: HashMap<TypeId, HandlerBinding>,
    by_tid: HashMap<Tid, HandlerBinding>,
    by_name: HashMap<String, HandlerBinding>,
    dictionary: TypeDictionary,
}

/// Registry of type handlers shared by every storer and loader of a persistence instance.
#[derive(Debug)]
pub struct TypeRegistry {
    state: RwLock<TypeState>,
    mapper: LegacyTypeMapper,
    first_type_id: u64,
    lazy_registration: bool,
}

impl TypeRegistry {
    /// Creates a registry seeded with `dictionary` and binds the native handlers.
    pub fn new(
        dictionary: TypeDictionary,
        refactorings: RefactoringMapping,
        first_type_id: u64,
        lazy_registration: bool,
    ) -> Result<Self> {
        let registry = Self {
            state: RwLock::new(TypeState {
                dictionary,
                ..TypeState::default()
            }),
            mapper: LegacyTypeMapper::new(refactorings),
            first_type_id,
            lazy_registration,
        };
        registry.bootstrap()?;
        Ok(registry)
    }

    fn bootstrap(&self) -> Result<()> {
        use native_ids::*;
        self.bind_native::<bool>(BOOL)?;
        self.bind_native::<i8>(I8)?;
        self.bind_native::<u8>(U8)?;
        self.bind_native::<i16>(I16)?;
        self.bind_native::<u16>(U16)?;
        self.bind_native::<i32>(I32)?;
        self.bind_native::<u32>(U32)?;
        self.bind_native::<i64>(I64)?;
        self.bind_native::<u64>(U64)?;
        self.bind_native::<f32>(F32)?;
        self.bind_native::<f64>(F64)?;
        self.bind_native::<char>(CHAR)?;
        self.bind_native::<String>(STRING)?;
        self.bind_native::<Vec<bool>>(VEC_BOOL)?;
        self.bind_native::<Vec<i8>>(VEC_BOOL + 1)?;
        self.bind_native::<Vec<u8>>(VEC_BOOL + 2)?;
        self.bind_native::<Vec<i16>>(VEC_BOOL + 3)?;
        self.bind_native::<Vec<u16>>(VEC_BOOL + 4)?;
        self.bind_native::<Vec<i32>>(VEC_BOOL + 5)?;
        self.bind_native::<Vec<u32>>(VEC_BOOL + 6)?;
        self.bind_native::<Vec<i64>>(VEC_BOOL + 7)?;
        self.bind_native::<Vec<u64>>(VEC_BOOL + 8)?;
        self.bind_native::<Vec<f32>>(VEC_BOOL + 9)?;
        self.bind_native::<Vec<f64>>(VEC_BOOL + 10)?;
        self.bind_native::<Vec<char>>(VEC_BOOL + 11)?;
        self.bind_native::<Duration>(DURATION)?;
        self.bind_native::<SystemTime>(SYSTEM_TIME)?;
        self.bind_native::<()>(UNIT)?;
        self.bind_native::<Vec<AnyRef>>(ANY_LIST)?;
        self.bind_native::<Roots>(ROOTS)?;
        Ok(())
    }

    fn bind_native<T: Persistable>(&self, tid: u64) -> Result<()> {
        let handler = T::create_handler()?;
        let mut state = self.state.write().map_err(poisoned("type registry"))?;
        state
            .dictionary
            .insert(Tid::new(tid), handler.description().clone())?;
        Self::bind(&mut state, Tid::new(tid), handler);
        Ok(())
    }

    fn bind(state: &mut TypeState, tid: Tid, handler: Arc<dyn TypeHandler>) -> HandlerBinding {
        let binding = HandlerBinding { tid, handler };
        state
            .by_rust_type
            .insert(binding.handler.rust_type(), binding.clone());
        state.by_tid.insert(tid, binding.clone());
        state
            .by_name
            .insert(binding.handler.type_name().to_string(), binding.clone());
        binding
    }

    /// Registers `T` explicitly, deriving its handler if needed, together with every type
    /// its entities can reference.
    pub fn register<T: Persistable>(&self) -> Result<HandlerBinding> {
        if let Some(binding) = self.lookup_rust_type(TypeId::of::<T>())? {
            return Ok(binding);
        }
        self.register_handler(T::create_handler()?)
    }

    /// Registers a handler, assigning it the dictionary id of its layout or a fresh one.
    ///
    /// A handler for an already registered runtime type returns the existing binding. A newly
    /// bound handler registers the types it references; cycles end at types already bound.
    pub fn register_handler(&self, handler: Arc<dyn TypeHandler>) -> Result<HandlerBinding> {
        let (binding, bound) = self.bind_handler(handler)?;
        if bound {
            binding.handler.register_dependencies(self)?;
        }
        Ok(binding)
    }

    /// Binds `handler` unless its runtime type is bound already. The flag is true if this
    /// call bound it.
    fn bind_handler(&self, handler: Arc<dyn TypeHandler>) -> Result<(HandlerBinding, bool)> {
        let mut state = self.state.write().map_err(poisoned("type registry"))?;
        if let Some(binding) = state.by_rust_type.get(&handler.rust_type()) {
            return Ok((binding.clone(), false));
        }
        let description = handler.description().clone();
        if let Some(other) = state.by_name.get(&description.type_name) {
            return Err(SwizzleError::TypeNotPersistable {
                type_name: description.type_name.clone(),
                reason: format!(
                    "the name is already taken by another runtime type bound to {}",
                    other.tid
                ),
            });
        }
        description.validate()?;
        let tid = match state.dictionary.find(&description) {
            Some(tid) => tid,
            None => {
                let tid = state.dictionary.next_tid(self.first_type_id);
                state.dictionary.insert(tid, description.clone())?;
                tid
            }
        };
        debug!(type_name = %description.type_name, %tid, "registered type handler");
        Ok((Self::bind(&mut state, tid, handler), true))
    }

    fn lookup_rust_type(&self, rust_type: TypeId) -> Result<Option<HandlerBinding>> {
        let state = self.state.read().map_err(poisoned("type registry"))?;
        Ok(state.by_rust_type.get(&rust_type).cloned())
    }

    /// The binding used to store `instance`, derived on first use.
    pub fn handler_for_instance(&self, instance: &Instance) -> Result<HandlerBinding> {
        if let Some(binding) = self.lookup_rust_type(instance.rust_type())? {
            return Ok(binding);
        }
        if !self.lazy_registration {
            return Err(SwizzleError::TypeNotPersistable {
                type_name: instance.type_name(),
                reason: "the type is not registered and lazy registration is disabled".into(),
            });
        }
        self.register_handler(instance.create_handler()?)
    }

    /// The binding that reads entities of `tid`, building a legacy handler if `tid` is an
    /// older layout of a registered type.
    pub fn handler_for_tid(&self, tid: Tid) -> Result<HandlerBinding> {
        {
            let state = self.state.read().map_err(poisoned("type registry"))?;
            if let Some(binding) = state.by_tid.get(&tid) {
                return Ok(binding.clone());
            }
        }

        let mut state = self.state.write().map_err(poisoned("type registry"))?;
        if let Some(binding) = state.by_tid.get(&tid) {
            return Ok(binding.clone());
        }
        let legacy = state
            .dictionary
            .get(tid)
            .cloned()
            .ok_or(SwizzleError::TypeNotHandled(tid))?;
        let current_name = self
            .mapper
            .refactorings()
            .current_type_name(&legacy.type_name)
            .to_string();
        let current = state
            .by_name
            .get(&current_name)
            .cloned()
            .ok_or(SwizzleError::TypeNotHandled(tid))?;

        let handler: Arc<dyn TypeHandler> = if current.handler.description().members
            == legacy.members
        {
            current.handler.clone()
        } else {
            let mapping = self.mapper.build(
                tid,
                &legacy,
                current.tid,
                current.handler.description(),
            )?;
            Arc::new(LegacyTypeHandler::new(mapping, current.handler.clone()))
        };
        let binding = HandlerBinding { tid, handler };
        state.by_tid.insert(tid, binding.clone());
        Ok(binding)
    }

    /// The binding registered under a current type name.
    pub fn handler_for_name(&self, type_name: &str) -> Result<Option<HandlerBinding>> {
        let state = self.state.read().map_err(poisoned("type registry"))?;
        Ok(state.by_name.get(type_name).cloned())
    }

    /// The tid `T` is stored under, if registered.
    pub fn tid_of<T: Persistable>(&self) -> Result<Option<Tid>> {
        Ok(self.lookup_rust_type(TypeId::of::<T>())?.map(|b| b.tid))
    }

    /// A snapshot of the dictionary, including every id assigned so far.
    pub fn dictionary(&self) -> Result<TypeDictionary> {
        let state = self.state.read().map_err(poisoned("type registry"))?;
        Ok(state.dictionary.clone())
    }
}
