//! The main entry point: a persistence instance wiring registries, configuration and the
//! storage collaborators together.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{PersistenceConfig, StoreMode};
use crate::error::{Result, SwizzleError};
use crate::graph::{Oid, Tid};
use crate::handler::expect_instance;
use crate::handler::roots::Roots;
use crate::io::{MemoryStore, Source, Target};
use crate::legacy::RefactoringMapping;
use crate::loader::GraphLoader;
use crate::object::{Handle, Persistable};
use crate::registry::{ObjectRegistry, TypeDictionary, TypeRegistry};
use crate::storer::GraphStorer;

/// Everything a storer or loader needs, passed explicitly instead of through globals.
pub struct PersistenceContext {
    config: PersistenceConfig,
    objects: Arc<ObjectRegistry>,
    types: Arc<TypeRegistry>,
    source: Arc<dyn Source>,
    target: Arc<dyn Target>,
}

impl PersistenceContext {
    /// The configuration in effect.
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// The shared identity registry.
    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    /// The type handler registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Where loaders read from.
    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    /// Where storers commit to.
    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("config", &self.config)
            .field("objects", &self.objects)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

/// Configures and creates a [`Persistence`].
#[derive(Default)]
pub struct PersistenceBuilder {
    config: PersistenceConfig,
    dictionary: Option<TypeDictionary>,
    refactorings: RefactoringMapping,
    objects: Option<Arc<ObjectRegistry>>,
    source: Option<Arc<dyn Source>>,
    target: Option<Arc<dyn Target>>,
}

impl PersistenceBuilder {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of output channels (a power of two).
    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.config.channel_count = channel_count;
        self
    }

    /// Sets the minimum size of each new chunk buffer region.
    pub fn buffer_increment(mut self, bytes: usize) -> Self {
        self.config.buffer_increment = bytes;
        self
    }

    /// Sets the default mode of created storers.
    pub fn store_mode(mut self, mode: StoreMode) -> Self {
        self.config.store_mode = mode;
        self
    }

    /// Enables or disables handler derivation on first store of an unregistered type.
    pub fn lazy_type_registration(mut self, enabled: bool) -> Self {
        self.config.lazy_type_registration = enabled;
        self
    }

    /// Seeds the type registry with the layouts of previously stored data.
    pub fn type_dictionary(mut self, dictionary: TypeDictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Renames applied when mapping legacy layouts.
    pub fn refactorings(mut self, refactorings: RefactoringMapping) -> Self {
        self.refactorings = refactorings;
        self
    }

    /// Shares an identity registry with other persistence instances.
    pub fn object_registry(mut self, objects: Arc<ObjectRegistry>) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Sets where loaders read from.
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets where storers commit to.
    pub fn target(mut self, target: Arc<dyn Target>) -> Self {
        self.target = Some(target);
        self
    }

    /// Uses one object as both source and target.
    pub fn storage<S: Source + Target + 'static>(self, storage: Arc<S>) -> Self {
        self.source(storage.clone()).target(storage)
    }

    /// Validates the configuration and creates the instance.
    pub fn build(self) -> Result<Persistence> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| SwizzleError::Configuration("no source configured".into()))?;
        let target = self
            .target
            .ok_or_else(|| SwizzleError::Configuration("no target configured".into()))?;
        let objects = self
            .objects
            .unwrap_or_else(|| Arc::new(ObjectRegistry::new(self.config.first_object_id)));
        let types = Arc::new(TypeRegistry::new(
            self.dictionary.unwrap_or_default(),
            self.refactorings,
            self.config.first_type_id,
            self.config.lazy_type_registration,
        )?);
        debug!(
            channels = self.config.channel_count,
            mode = ?self.config.store_mode,
            "created persistence instance"
        );
        Ok(Persistence {
            context: Arc::new(PersistenceContext {
                config: self.config,
                objects,
                types,
                source,
                target,
            }),
        })
    }
}

impl fmt::Debug for PersistenceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceBuilder")
            .field("config", &self.config)
            .field("refactorings", &self.refactorings)
            .finish_non_exhaustive()
    }
}

/// A persistence instance. Cheap to clone; clones share every registry.
#[derive(Debug, Clone)]
pub struct Persistence {
    context: Arc<PersistenceContext>,
}

impl Persistence {
    /// Starts configuring an instance.
    pub fn builder() -> PersistenceBuilder {
        PersistenceBuilder::default()
    }

    /// An instance backed by a fresh [`MemoryStore`], returned alongside it.
    pub fn in_memory() -> Result<(Self, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let persistence = Self::builder().storage(store.clone()).build()?;
        Ok((persistence, store))
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<PersistenceContext> {
        &self.context
    }

    /// The configuration in effect.
    pub fn config(&self) -> &PersistenceConfig {
        self.context.config()
    }

    /// The shared identity registry.
    pub fn objects(&self) -> &ObjectRegistry {
        self.context.objects()
    }

    /// The type handler registry.
    pub fn types(&self) -> &TypeRegistry {
        self.context.types()
    }

    /// A storer in the configured mode.
    pub fn storer(&self) -> GraphStorer {
        GraphStorer::new(self.context.clone(), self.context.config().store_mode)
    }

    /// A storer that stores every reachable instance again.
    pub fn eager_storer(&self) -> GraphStorer {
        GraphStorer::new(self.context.clone(), StoreMode::Eager)
    }

    /// A loader reading from the configured source.
    pub fn loader(&self) -> GraphLoader {
        GraphLoader::new(self.context.clone())
    }

    /// Stores `root` and commits in one step.
    pub fn store<T: Persistable>(&self, root: &Handle<T>) -> Result<Oid> {
        let mut storer = self.storer();
        let oid = storer.store(root)?;
        storer.commit()?;
        Ok(oid)
    }

    /// Loads the latest [`Roots`] of the initial read, or `None` for a storage without roots.
    pub fn load_initial(&self) -> Result<Option<Handle<Roots>>> {
        self.loader().load_initial()
    }

    /// Loads the initial roots and returns the one bound to `name`. `T` is registered first
    /// so that its graph can be read by a fresh instance.
    pub fn load_root<T: Persistable>(&self, name: &str) -> Result<Option<Handle<T>>> {
        self.types().register::<T>()?;
        let Some(roots) = self.load_initial()? else {
            return Ok(None);
        };
        let root = roots.read().get_as::<T>(name)?;
        Ok(root)
    }

    /// Loads the `T` stored under `oid`. `T` and the types its fields name are registered
    /// first if needed; types reached only through [`AnyRef`] must be registered by hand.
    ///
    /// [`AnyRef`]: crate::object::AnyRef
    pub fn load<T: Persistable>(&self, oid: Oid) -> Result<Handle<T>> {
        self.types().register::<T>()?;
        let instance = self
            .loader()
            .load_object(oid)?
            .ok_or(SwizzleError::MissingObject(oid))?;
        expect_instance::<T>(&instance)
    }

    /// Registers `T` ahead of its first store.
    pub fn register<T: Persistable>(&self) -> Result<Tid> {
        self.types().register::<T>().map(|binding| binding.tid)
    }

    /// Binds a well-known instance to a fixed oid.
    pub fn register_constant<T: Persistable>(&self, oid: Oid, constant: &Handle<T>) -> Result<()> {
        self.objects().register_constant(oid, constant.to_instance())
    }

    /// A snapshot of every type layout known so far, to be persisted next to the data.
    pub fn type_dictionary(&self) -> Result<TypeDictionary> {
        self.types().dictionary()
    }
}
