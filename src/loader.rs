//! The load path.
//!
//! A [`GraphLoader`] rebuilds live instances from entity chunks in three phases:
//!
//! 1. **Materialization.** Every entity gets a build item keyed by its oid and a blank
//!    instance from its handler's `create`. Oids the shared registry already knows become
//!    skip items resolving to the live instance, which is never overwritten. The references
//!    of every new item are harvested; untracked oids are requested from the [`Source`] until
//!    no new oid appears.
//! 2. **Population.** Each blank instance is registered with register-or-get semantics, then
//!    every instance this call owns is populated by `update`, in encounter order. References
//!    resolve to instances that exist but may still be blank, which is what makes cycles safe.
//! 3. **Completion.** Handlers that defer work run `complete`, again in encounter order.
//!
//! The build table is cleared before every call returns. A failing call unregisters the
//! instances it registered.
//!
//! An initial load starts from the [`Roots`] entity with the highest object id in the
//! source's initial read; its references are requested like any others.
//!
//! [`Source`]: crate::io::Source

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::api::PersistenceContext;
use crate::error::{Result, SwizzleError};
use crate::format::{EntitySpan, EntityView, index_entities, iter_entities};
use crate::graph::{BuildTable, EntityLocation, Oid, Tid};
use crate::handler::roots::{Roots, latest_roots};
use crate::handler::{ObjectResolver, PendingCompletion, expect_instance};
use crate::io::{LoadRequest, RawChunk};
use crate::object::{Handle, Instance};
use crate::registry::native_ids;

/// Resolves object ids against the build table of the running call, then the shared registry.
struct BuildResolver<'a> {
    table: &'a BuildTable,
    context: &'a Arc<PersistenceContext>,
}

impl ObjectResolver for BuildResolver<'_> {
    fn resolve(&self, oid: Oid) -> Result<Option<Instance>> {
        if oid.is_null() {
            return Ok(None);
        }
        if let Some(resolved) = self.table.resolve(oid) {
            return Ok(resolved);
        }
        self.context
            .objects()
            .lookup_object(oid)?
            .map(Some)
            .ok_or(SwizzleError::MissingObject(oid))
    }

    fn persistence(&self) -> Weak<PersistenceContext> {
        Arc::downgrade(self.context)
    }
}

/// Loads entities from a source into live instances.
///
/// A loader is meant for one thread at a time; independent loaders sharing one persistence
/// context run fully in parallel.
#[derive(Debug)]
pub struct GraphLoader {
    context: Arc<PersistenceContext>,
    table: BuildTable,
    chunks: Vec<RawChunk>,
    skipped: HashSet<Oid>,
}

impl GraphLoader {
    /// Creates a loader reading from the context's source.
    pub fn new(context: Arc<PersistenceContext>) -> Self {
        let capacity = context.config().initial_item_capacity;
        Self {
            context,
            table: BuildTable::with_capacity(capacity),
            chunks: Vec::new(),
            skipped: HashSet::new(),
        }
    }

    /// Excludes `oid` from loading. References to it resolve to the instance the shared
    /// registry holds for it, or to null.
    pub fn register_skip(&mut self, oid: Oid) {
        self.skipped.insert(oid);
    }

    /// Reads the initial chunks and loads the latest [`Roots`] entity found in them, with
    /// everything it references. Other entities of the initial read are not loaded.
    pub fn load_initial(&mut self) -> Result<Option<Handle<Roots>>> {
        let chunks = self.context.source().read_initial()?;
        let entities = chunks
            .iter()
            .flat_map(|chunk| iter_entities(chunk))
            .collect::<Result<Vec<_>>>()?;
        let Some(latest) = latest_roots(entities.into_iter(), Tid::new(native_ids::ROOTS)) else {
            debug!(chunks = chunks.len(), "no roots in initial read");
            return Ok(None);
        };
        let oid = latest.oid();
        let mut bytes = latest.header().to_bytes().to_vec();
        bytes.extend_from_slice(latest.content());
        let chunk = RawChunk::from(bytes);

        let roots = self.run(vec![chunk], &[oid])?.pop().flatten();
        roots.as_ref().map(expect_instance::<Roots>).transpose()
    }

    /// Loads the instance stored under `oid` together with everything it references.
    pub fn load_object(&mut self, oid: Oid) -> Result<Option<Instance>> {
        self.collect(&[oid]).map(|mut roots| roots.pop().flatten())
    }

    /// Loads several roots in one call. Each result is null only for the null oid.
    pub fn collect(&mut self, oids: &[Oid]) -> Result<Vec<Option<Instance>>> {
        self.run(Vec::new(), oids)
    }

    fn run(&mut self, initial: Vec<RawChunk>, roots: &[Oid]) -> Result<Vec<Option<Instance>>> {
        let result = self.build(initial, roots);
        if result.is_err() {
            self.release();
        }
        self.table.clear();
        self.chunks.clear();
        result
    }

    fn build(&mut self, initial: Vec<RawChunk>, roots: &[Oid]) -> Result<Vec<Option<Instance>>> {
        let channel_count = self.context.config().channel_count;

        // --- PHASE 1: MATERIALIZATION ---

        let mut request = LoadRequest::new(channel_count);
        for &oid in roots {
            self.track(oid, &mut request)?;
        }
        let mut batch = initial;
        if batch.is_empty() && !request.is_empty() {
            batch = self.context.source().read_by_object_ids(&request)?;
        }
        loop {
            let start = self.table.len();
            self.materialize(batch)?;
            if let Some(missing) = request.oids().find(|oid| !self.table.contains(*oid)) {
                return Err(SwizzleError::MissingObject(missing));
            }
            request.clear();
            self.harvest(start, &mut request)?;
            if request.is_empty() {
                break;
            }
            debug!(requested = request.len(), "requesting referenced entities");
            batch = self.context.source().read_by_object_ids(&request)?;
        }

        // --- PHASE 2: POPULATION ---

        let objects = self.context.objects();
        for item in self.table.items_mut() {
            if let Some(local) = &item.local {
                item.resolved = Some(objects.register_or_get(item.oid, local.clone())?);
            }
        }

        let mut pending: Vec<(usize, Option<PendingCompletion>)> = Vec::new();
        {
            let resolver = BuildResolver {
                table: &self.table,
                context: &self.context,
            };
            for (index, item) in self.table.items().iter().enumerate() {
                let Some(instance) = item.resolved.as_ref().filter(|_| item.is_owned()) else {
                    continue;
                };
                let entity = self.entity(item.location)?;
                let handler = &item.binding.handler;
                let deferred = handler.update(&entity, instance, &resolver)?;
                trace!(oid = %item.oid, type_name = handler.type_name(), "updated instance");
                if handler.requires_completion() {
                    pending.push((index, deferred));
                }
            }

            // --- PHASE 3: COMPLETION ---

            for (index, deferred) in pending {
                let item = &self.table.items()[index];
                let Some(instance) = item.resolved.as_ref() else {
                    continue;
                };
                let entity = self.entity(item.location)?;
                item.binding
                    .handler
                    .complete(&entity, instance, deferred, &resolver)?;
            }
        }

        debug!(entities = self.table.len(), chunks = self.chunks.len(), "loaded graph");
        let resolver = BuildResolver {
            table: &self.table,
            context: &self.context,
        };
        roots.iter().map(|&oid| resolver.resolve(oid)).collect()
    }

    /// Registers `oid` as needed, requesting it unless it is already known.
    fn track(&mut self, oid: Oid, request: &mut LoadRequest) -> Result<()> {
        if oid.is_null() || self.table.contains(oid) || request.contains(oid) {
            return Ok(());
        }
        if self.skipped.contains(&oid) {
            let existing = self.context.objects().lookup_object(oid)?;
            self.table.insert_skip(oid, existing);
            return Ok(());
        }
        if let Some(existing) = self.context.objects().lookup_object(oid)? {
            self.table.insert_skip(oid, Some(existing));
            return Ok(());
        }
        request.require(oid);
        Ok(())
    }

    /// Indexes a batch of chunks, places their entities and creates blank instances for the
    /// new items.
    fn materialize(&mut self, batch: Vec<RawChunk>) -> Result<()> {
        let spans: Vec<Vec<EntitySpan>> = batch
            .par_iter()
            .map(|chunk| index_entities(chunk))
            .collect::<Result<_>>()?;

        let start = self.table.len();
        let objects = self.context.objects();
        let types = self.context.types();
        for (chunk, spans) in batch.into_iter().zip(spans) {
            let chunk_index = self.chunks.len();
            self.chunks.push(chunk);
            for span in spans {
                let oid = span.header.oid;
                if self.skipped.contains(&oid) {
                    self.table.insert_skip(oid, objects.lookup_object(oid)?);
                    continue;
                }
                if !self.table.contains(oid)
                    && let Some(existing) = objects.lookup_object(oid)?
                {
                    self.table.insert_skip(oid, Some(existing));
                    continue;
                }
                let binding = types.handler_for_tid(span.header.tid)?;
                let location = EntityLocation {
                    chunk: chunk_index,
                    offset: span.offset,
                };
                self.table.place(oid, binding, location);
            }
        }

        let chunks = &self.chunks;
        self.table.items_mut()[start..]
            .par_iter_mut()
            .try_for_each(|item| -> Result<()> {
                let entity = EntityView::parse(&chunks[item.location.chunk][item.location.offset..])?;
                let handler = &item.binding.handler;
                handler.validate_length(&entity)?;
                item.local = Some(handler.create(&entity)?);
                Ok(())
            })?;
        for item in &self.table.items()[start..] {
            objects.observe_oid(item.oid)?;
        }
        Ok(())
    }

    /// Feeds the references of the items created since `start` into the request.
    fn harvest(&mut self, start: usize, request: &mut LoadRequest) -> Result<()> {
        let mut found = Vec::new();
        for item in &self.table.items()[start..] {
            let entity = self.entity(item.location)?;
            item.binding
                .handler
                .iterate_references(&entity, &mut |oid| found.push(oid))?;
        }
        for oid in found {
            self.track(oid, request)?;
        }
        Ok(())
    }

    fn entity(&self, location: EntityLocation) -> Result<EntityView<'_>> {
        let chunk = self.chunks.get(location.chunk).ok_or_else(|| {
            SwizzleError::Internal(format!("build item points to missing chunk {}", location.chunk))
        })?;
        EntityView::parse(&chunk[location.offset..])
    }

    /// Unregisters the instances this call registered.
    fn release(&self) {
        let owned: Vec<Oid> = self
            .table
            .items()
            .iter()
            .filter(|item| item.is_owned())
            .map(|item| item.oid)
            .collect();
        if owned.is_empty() {
            return;
        }
        warn!(count = owned.len(), "rolling back partially loaded instances");
        if let Err(e) = self.context.objects().unregister(&owned) {
            warn!(error = %e, "failed to unregister object ids");
        }
    }
}
