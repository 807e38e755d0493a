//! The store path.
//!
//! A [`GraphStorer`] turns a graph of live instances into entities. Every instance reached
//! from a stored root receives an object id; new instances are appended to a pending chain
//! that is drained iteratively, so graph depth and cycles never grow the stack. Entities are
//! sharded into `N` channel buffers by `oid & (N - 1)` and handed to the [`Target`] on
//! [`GraphStorer::commit`].
//!
//! Object ids assigned by a call are registered in the shared [`ObjectRegistry`] right away
//! and rolled back if the call fails or the storer is dropped without committing.
//!
//! [`ObjectRegistry`]: crate::registry::ObjectRegistry

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::api::PersistenceContext;
use crate::chunk::{ChunkBuffer, EntitySink};
use crate::config::StoreMode;
use crate::error::Result;
use crate::graph::{Oid, StoreChain, StoreItem};
use crate::handler::ObjectStorer;
use crate::io::ChunkRef;
use crate::object::{Handle, Instance, Persistable};

/// Reference handling state of one store call. Split from the channel buffers so that a
/// handler can write into a buffer while resolving references through this state.
#[derive(Debug)]
struct StoreState {
    context: Arc<PersistenceContext>,
    mode: StoreMode,
    chain: StoreChain,
    new_oids: Vec<Oid>,
}

impl StoreState {
    fn register(&mut self, instance: &Instance, force: bool) -> Result<Oid> {
        if let Some(oid) = self.chain.lookup(instance) {
            return Ok(oid);
        }
        let objects = self.context.objects();
        if !force && let Some(oid) = objects.lookup_object_id(instance)? {
            self.chain.mark(instance, oid);
            return Ok(oid);
        }

        // Resolve the handler first so that a non-persistable type never receives an oid.
        let binding = self.context.types().handler_for_instance(instance)?;
        let (oid, assigned) = objects.ensure_object_id(instance)?;
        if assigned {
            self.new_oids.push(oid);
        } else if !force {
            // Registered concurrently by another call since the lookup above.
            self.chain.mark(instance, oid);
            return Ok(oid);
        }
        self.chain.enqueue(StoreItem {
            oid,
            instance: instance.clone(),
            binding,
        });
        Ok(oid)
    }
}

impl ObjectStorer for StoreState {
    fn apply(&mut self, instance: &Instance) -> Result<Oid> {
        self.register(instance, self.mode == StoreMode::Eager)
    }

    fn apply_eager(&mut self, instance: &Instance) -> Result<Oid> {
        self.register(instance, true)
    }
}

/// Stores object graphs into channel buffers and commits them to a target.
///
/// A storer is meant for one thread at a time; independent storers sharing one persistence
/// context run fully in parallel.
#[derive(Debug)]
pub struct GraphStorer {
    state: StoreState,
    channels: Vec<ChunkBuffer>,
}

impl GraphStorer {
    /// Creates a storer using `mode` for references to already registered instances.
    pub fn new(context: Arc<PersistenceContext>, mode: StoreMode) -> Self {
        let config = context.config();
        let channels = (0..config.channel_count)
            .map(|_| ChunkBuffer::new(config.buffer_increment))
            .collect();
        let chain = StoreChain::with_capacity(config.initial_item_capacity);
        Self {
            state: StoreState {
                context,
                mode,
                chain,
                new_oids: Vec::new(),
            },
            channels,
        }
    }

    /// The reference handling mode.
    pub fn mode(&self) -> StoreMode {
        self.state.mode
    }

    /// Number of output channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of entities written since the last commit or clear.
    pub fn pending_entities(&self) -> usize {
        self.state.chain.written()
    }

    /// Number of instances handled since the last commit or clear: written, skipped or
    /// mapped.
    pub fn handled_instances(&self) -> usize {
        self.state.chain.len()
    }

    /// Bytes buffered since the last commit or clear.
    pub fn buffered_bytes(&self) -> usize {
        self.channels.iter().map(ChunkBuffer::byte_len).sum()
    }

    /// Stores `root` and everything reachable from it that needs storing.
    ///
    /// The root itself is always written, even if the shared registry already knows it.
    pub fn store<T: Persistable>(&mut self, root: &Handle<T>) -> Result<Oid> {
        self.store_instance(&root.to_instance())
    }

    /// Type-erased variant of [`GraphStorer::store`].
    pub fn store_instance(&mut self, root: &Instance) -> Result<Oid> {
        let result = self
            .state
            .apply_eager(root)
            .and_then(|oid| self.drain().map(|()| oid));
        if result.is_err() {
            self.rollback();
        }
        result
    }

    /// Stores several roots in one call, returning their oids in order.
    pub fn store_all<'a, I>(&mut self, roots: I) -> Result<Vec<Oid>>
    where
        I: IntoIterator<Item = &'a Instance>,
    {
        let roots = roots.into_iter();
        self.ensure_capacity(roots.size_hint().0);
        let mut oids = Vec::new();
        for root in roots {
            oids.push(self.store_instance(root)?);
        }
        Ok(oids)
    }

    /// Marks `instance` as handled without storing it; references to it use its registered
    /// oid (assigned now if it has none).
    pub fn skip(&mut self, instance: &Instance) -> Result<Oid> {
        if let Some(oid) = self.state.chain.lookup(instance) {
            return Ok(oid);
        }
        let (oid, assigned) = self.state.context.objects().ensure_object_id(instance)?;
        if assigned {
            self.state.new_oids.push(oid);
        }
        self.state.chain.mark(instance, oid);
        Ok(oid)
    }

    /// Makes references to `instance` use `oid` in this call without storing it.
    pub fn skip_mapped(&mut self, instance: &Instance, oid: Oid) {
        self.state.chain.mark(instance, oid);
    }

    /// Makes references to `instance` store as null in this call.
    pub fn skip_nulled(&mut self, instance: &Instance) {
        self.state.chain.mark(instance, Oid::NULL);
    }

    /// Pre-sizes the item table for `additional` more instances.
    pub fn ensure_capacity(&mut self, additional: usize) {
        self.state.chain.reserve(additional);
    }

    fn drain(&mut self) -> Result<()> {
        let channel_count = self.channels.len();
        while let Some(item) = self.state.chain.next_pending() {
            let handler = &item.binding.handler;
            let description = handler.description();
            let sink = EntitySink::new(
                &mut self.channels[item.oid.channel(channel_count)],
                item.binding.tid,
                item.oid,
                description.min_length(),
                description.max_length(),
            );
            handler.store(sink, &item.instance, &mut self.state)?;
            trace!(
                oid = %item.oid,
                tid = %item.binding.tid,
                type_name = handler.type_name(),
                pending = self.state.chain.pending(),
                "stored entity"
            );
        }
        Ok(())
    }

    /// Writes every non-empty channel to the target and clears the storer.
    ///
    /// On failure the oids assigned since the last commit are unregistered.
    pub fn commit(&mut self) -> Result<()> {
        let chunks: Vec<ChunkRef<'_>> = self
            .channels
            .iter()
            .enumerate()
            .flat_map(|(channel, buffer)| {
                buffer
                    .regions()
                    .map(move |bytes| ChunkRef { channel, bytes })
            })
            .collect();

        let result = if chunks.is_empty() {
            Ok(())
        } else {
            self.state.context.target().write(&chunks)
        };
        match result {
            Ok(()) => {
                debug!(
                    entities = self.state.chain.written(),
                    new_oids = self.state.new_oids.len(),
                    chunks = chunks.len(),
                    bytes = chunks.iter().map(|c| c.bytes.len()).sum::<usize>(),
                    "committed store batch"
                );
                self.state.new_oids.clear();
                self.reset();
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Discards everything buffered since the last commit and unregisters the oids assigned
    /// meanwhile.
    pub fn clear(&mut self) {
        if !self.state.new_oids.is_empty() {
            debug!(count = self.state.new_oids.len(), "releasing uncommitted object ids");
            self.release_new_oids();
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state.chain.clear();
        self.channels.iter_mut().for_each(ChunkBuffer::clear);
    }

    fn release_new_oids(&mut self) {
        if let Err(e) = self.state.context.objects().unregister(&self.state.new_oids) {
            warn!(error = %e, "failed to unregister object ids");
        }
        self.state.new_oids.clear();
    }

    fn rollback(&mut self) {
        if !self.state.new_oids.is_empty() {
            warn!(count = self.state.new_oids.len(), "rolling back uncommitted object ids");
            self.release_new_oids();
        }
        self.reset();
    }
}

impl Drop for GraphStorer {
    fn drop(&mut self) {
        if !self.state.chain.is_empty() || !self.state.new_oids.is_empty() {
            self.rollback();
        }
    }
}
