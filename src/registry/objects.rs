//! The shared identity registry.
//!
//! The only cross-call, cross-thread mutable state of the engine: a bidirectional mapping
//! between object ids and live instances plus the object id provider. Every operation runs
//! under one mutex, so two threads racing to register the same object id converge on exactly
//! one instance.
//!
//! The registry holds strong references. An instance stays registered, and therefore alive,
//! until it is explicitly unregistered.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, SwizzleError, poisoned};
use crate::graph::Oid;
use crate::object::Instance;

#[derive(Debug, Default)]
struct RegistryState {
    by_oid: HashMap<Oid, Instance>,
    by_identity: HashMap<usize, Oid>,
    next_oid: u64,
}

impl RegistryState {
    fn bind(&mut self, oid: Oid, instance: Instance) {
        self.by_identity.insert(instance.identity(), oid);
        self.by_oid.insert(oid, instance);
        self.observe(oid);
    }

    fn observe(&mut self, oid: Oid) {
        if oid.as_u64() >= self.next_oid {
            self.next_oid = oid.as_u64().saturating_add(1);
        }
    }
}

/// Thread-safe oid ↔ instance registry shared by storers and loaders.
#[derive(Debug)]
pub struct ObjectRegistry {
    state: Mutex<RegistryState>,
    first_oid: u64,
}

impl ObjectRegistry {
    /// Creates an empty registry whose provider starts at `first_oid`.
    pub fn new(first_oid: u64) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_oid: first_oid.max(1),
                ..RegistryState::default()
            }),
            first_oid: first_oid.max(1),
        }
    }

    /// The first object id this registry hands out.
    pub fn first_oid(&self) -> Oid {
        Oid::new(self.first_oid)
    }

    /// The object id of `instance`, if registered.
    pub fn lookup_object_id(&self, instance: &Instance) -> Result<Option<Oid>> {
        let state = self.state.lock().map_err(poisoned("object registry"))?;
        Ok(state.by_identity.get(&instance.identity()).copied())
    }

    /// The instance registered under `oid`.
    pub fn lookup_object(&self, oid: Oid) -> Result<Option<Instance>> {
        let state = self.state.lock().map_err(poisoned("object registry"))?;
        Ok(state.by_oid.get(&oid).cloned())
    }

    /// Binds a well-known instance to a fixed object id.
    ///
    /// Re-registering the same pair is a no-op; binding either side to something else fails.
    pub fn register_constant(&self, oid: Oid, instance: Instance) -> Result<()> {
        if oid.is_null() {
            return Err(SwizzleError::Configuration(
                "constants cannot use the null object id".into(),
            ));
        }
        let mut state = self.state.lock().map_err(poisoned("object registry"))?;
        if let Some(existing) = state.by_oid.get(&oid) {
            if existing.ptr_eq(&instance) {
                return Ok(());
            }
            return Err(SwizzleError::Configuration(format!(
                "{oid} is already bound to another {}",
                existing.type_name()
            )));
        }
        if let Some(bound) = state.by_identity.get(&instance.identity()) {
            return Err(SwizzleError::Configuration(format!(
                "constant {} is already registered as {bound}",
                instance.type_name()
            )));
        }
        state.bind(oid, instance);
        Ok(())
    }

    /// Returns the object id of `instance`, assigning a fresh one if it has none.
    ///
    /// The flag is true if the id was assigned by this call.
    pub fn ensure_object_id(&self, instance: &Instance) -> Result<(Oid, bool)> {
        let mut state = self.state.lock().map_err(poisoned("object registry"))?;
        if let Some(oid) = state.by_identity.get(&instance.identity()) {
            return Ok((*oid, false));
        }
        let oid = Oid::new(state.next_oid);
        state.bind(oid, instance.clone());
        Ok((oid, true))
    }

    /// Atomically registers `instance` under `oid` unless another instance already holds
    /// that id, and returns the winner.
    pub fn register_or_get(&self, oid: Oid, instance: Instance) -> Result<Instance> {
        let mut state = self.state.lock().map_err(poisoned("object registry"))?;
        if let Some(existing) = state.by_oid.get(&oid) {
            if !existing.ptr_eq(&instance) {
                debug!(%oid, type_name = %existing.type_name(), "lost register race");
            }
            return Ok(existing.clone());
        }
        state.bind(oid, instance.clone());
        Ok(instance)
    }

    /// Advances the provider past `oid` so that fresh ids never collide with loaded ones.
    pub fn observe_oid(&self, oid: Oid) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned("object registry"))?;
        state.observe(oid);
        Ok(())
    }

    /// Removes the given ids and their instances.
    pub fn unregister(&self, oids: &[Oid]) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned("object registry"))?;
        for oid in oids {
            if let Some(instance) = state.by_oid.remove(oid) {
                state.by_identity.remove(&instance.identity());
            }
        }
        Ok(())
    }

    /// Number of registered instances.
    pub fn len(&self) -> Result<usize> {
        let state = self.state.lock().map_err(poisoned("object registry"))?;
        Ok(state.by_oid.len())
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }
}
