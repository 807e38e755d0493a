use std::collections::HashMap;

use crate::graph::Oid;
use crate::object::Instance;
use crate::registry::HandlerBinding;

/// Position of an entity inside the chunks of a load call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// Index of the chunk.
    pub chunk: usize,
    /// Byte offset of the entity header inside the chunk.
    pub offset: usize,
}

/// An oid being materialized by the current load call.
#[derive(Debug)]
pub struct BuildItem {
    /// Object id of the entity.
    pub oid: Oid,
    /// Handler bound to the entity's type id.
    pub binding: HandlerBinding,
    /// Where the entity bytes live.
    pub location: EntityLocation,
    /// Blank instance created from the entity header.
    pub local: Option<Instance>,
    /// Instance the shared registry settled on. Differs from `local` after a lost race.
    pub resolved: Option<Instance>,
}

impl BuildItem {
    /// The instance references to this oid resolve to.
    pub fn instance(&self) -> Option<&Instance> {
        self.resolved.as_ref().or(self.local.as_ref())
    }

    /// True if this call's local instance won the registration and must be populated.
    pub fn is_owned(&self) -> bool {
        match (&self.local, &self.resolved) {
            (Some(local), Some(resolved)) => local.ptr_eq(resolved),
            _ => false,
        }
    }
}

#[derive(Debug)]
enum Slot {
    /// Not loaded: resolves to an instance that already exists, or to null.
    Skip(Option<Instance>),
    /// Index into the item arena.
    Item(usize),
}

/// The transient item table of one load call: a hash table keyed by oid over an arena of
/// items kept in encounter order.
#[derive(Debug, Default)]
pub struct BuildTable {
    slots: HashMap<Oid, Slot>,
    items: Vec<BuildItem>,
}

impl BuildTable {
    /// Creates an empty table sized for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            items: Vec::with_capacity(capacity),
        }
    }

    /// True if `oid` is tracked, as an item or as a skip.
    pub fn contains(&self, oid: Oid) -> bool {
        self.slots.contains_key(&oid)
    }

    /// Tracks `oid` as not to be loaded.
    pub fn insert_skip(&mut self, oid: Oid, existing: Option<Instance>) {
        self.slots.entry(oid).or_insert(Slot::Skip(existing));
    }

    /// Records the entity of `oid` found at `location`.
    ///
    /// A later entity of an oid whose instance has not been created yet replaces the earlier
    /// one. Entities of skipped or already created oids are ignored. Returns true if a new
    /// item was appended.
    pub fn place(&mut self, oid: Oid, binding: HandlerBinding, location: EntityLocation) -> bool {
        match self.slots.get(&oid) {
            Some(Slot::Skip(_)) => false,
            Some(Slot::Item(index)) => {
                let item = &mut self.items[*index];
                if item.local.is_none() {
                    item.binding = binding;
                    item.location = location;
                }
                false
            }
            None => {
                self.slots.insert(oid, Slot::Item(self.items.len()));
                self.items.push(BuildItem {
                    oid,
                    binding,
                    location,
                    local: None,
                    resolved: None,
                });
                true
            }
        }
    }

    /// What `oid` resolves to: `None` if untracked, otherwise the (possibly null) instance.
    pub fn resolve(&self, oid: Oid) -> Option<Option<Instance>> {
        match self.slots.get(&oid)? {
            Slot::Skip(existing) => Some(existing.clone()),
            Slot::Item(index) => Some(self.items[*index].instance().cloned()),
        }
    }

    /// Items in encounter order.
    pub fn items(&self) -> &[BuildItem] {
        &self.items
    }

    /// Mutable items in encounter order.
    pub fn items_mut(&mut self) -> &mut [BuildItem] {
        &mut self.items
    }

    /// Number of items (skips excluded).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no item was placed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops every item and skip.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.items.clear();
    }
}
