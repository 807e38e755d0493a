use std::collections::HashMap;

use crate::graph::Oid;
use crate::object::Instance;
use crate::registry::HandlerBinding;

/// An instance queued for storage in the current call.
#[derive(Debug, Clone)]
pub struct StoreItem {
    /// Object id written into the entity header.
    pub oid: Oid,
    /// The instance. Held so its identity stays valid until the call ends.
    pub instance: Instance,
    /// Handler and type id used to write the entity.
    pub binding: HandlerBinding,
}

/// The transient item table of one store call.
///
/// Acts as an arena: items are appended to the tail of the pending chain as they are
/// discovered and drained from the head by a cursor, so the walk never recurses.
#[derive(Debug, Default)]
pub struct StoreChain {
    /// Identity → oid of every instance handled in this call, stored or skipped.
    known: HashMap<usize, (Oid, Instance)>,
    items: Vec<StoreItem>,
    cursor: usize,
}

impl StoreChain {
    /// Creates an empty chain sized for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            known: HashMap::with_capacity(capacity),
            items: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// The oid assigned to `instance` in this call, if any.
    pub fn lookup(&self, instance: &Instance) -> Option<Oid> {
        self.known.get(&instance.identity()).map(|(oid, _)| *oid)
    }

    /// Records `instance` as handled without queueing it.
    pub fn mark(&mut self, instance: &Instance, oid: Oid) {
        self.known
            .insert(instance.identity(), (oid, instance.clone()));
    }

    /// Appends an item to the tail of the pending chain.
    pub fn enqueue(&mut self, item: StoreItem) {
        self.mark(&item.instance, item.oid);
        self.items.push(item);
    }

    /// Takes the next pending item from the head of the chain.
    pub fn next_pending(&mut self) -> Option<StoreItem> {
        let item = self.items.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }

    /// Number of queued items not yet written.
    pub fn pending(&self) -> usize {
        self.items.len() - self.cursor
    }

    /// Number of items written so far.
    pub fn written(&self) -> usize {
        self.cursor
    }

    /// Number of instances handled in this call.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True if nothing was handled in this call.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Reserves room for `additional` more items.
    pub fn reserve(&mut self, additional: usize) {
        self.known.reserve(additional);
        self.items.reserve(additional);
    }

    /// Drops every item.
    pub fn clear(&mut self) {
        self.known.clear();
        self.items.clear();
        self.cursor = 0;
    }
}
