//! Named entry points of a storage.
//!
//! [`Roots`] maps names to root instances and is stored like any other value, under the
//! fixed type id `native_ids::ROOTS`. An initial load looks for the roots entity with the
//! highest object id and rebuilds the graph from it.
//!
//! Layout: a list of root references followed by the names as one byte list, each name
//! terminated by a zero byte. References lead so that traversal never reads the names.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::chunk::EntitySink;
use crate::element::typed;
use crate::error::{Result, SwizzleError};
use crate::format::{
    ContentReader, EntityView, LIST_HEADER_LENGTH, ListHeader, REFERENCE_LENGTH, write_list,
};
use crate::graph::Tid;
use crate::handler::{
    ObjectResolver, ObjectStorer, PendingCompletion, TypeHandler, expect_instance,
};
use crate::layout::{MemberDescriptor, MemberKind, PrimitiveKind, TypeDescription};
use crate::object::{Handle, Instance, Persistable};
use crate::traverse::ReferenceTraversal;

const NAME_TERMINATOR: u8 = 0;

/// Named root instances, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Roots {
    entries: Vec<(String, Instance)>,
}

impl Roots {
    /// An empty set of roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `root`, replacing an earlier binding of the same name in place.
    pub fn set(&mut self, name: impl Into<String>, root: impl Into<Instance>) -> Result<()> {
        let name = name.into();
        if name.as_bytes().contains(&NAME_TERMINATOR) {
            return Err(SwizzleError::Configuration(format!(
                "root name {name:?} contains a zero byte"
            )));
        }
        let root = root.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = root,
            None => self.entries.push((name, root)),
        }
        Ok(())
    }

    /// The root bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, i)| i)
    }

    /// The root bound to `name`, typed. Fails if it is not a `T`.
    pub fn get_as<T: Persistable>(&self, name: &str) -> Result<Option<Handle<T>>> {
        self.get(name).cloned().map(typed::<T>).transpose()
    }

    /// Removes the binding of `name`.
    pub fn remove(&mut self, name: &str) -> Option<Instance> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Bound names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn name_bytes(&self) -> usize {
        self.entries.iter().map(|(n, _)| n.len() + 1).sum()
    }
}

impl Persistable for Roots {
    fn type_name() -> String {
        "Roots".to_string()
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(RootsHandler::new()))
    }
}

/// Handler for [`Roots`].
pub struct RootsHandler {
    description: TypeDescription,
    traversal: ReferenceTraversal,
}

impl RootsHandler {
    /// Creates the handler.
    pub fn new() -> Self {
        let description = TypeDescription::new(
            Roots::type_name(),
            vec![
                MemberDescriptor::new(
                    "instances",
                    "[AnyRef]",
                    MemberKind::ComplexList(vec![MemberDescriptor::new(
                        "instance",
                        "AnyRef",
                        MemberKind::Reference,
                    )]),
                ),
                MemberDescriptor::new(
                    "identifiers",
                    "[u8]",
                    MemberKind::ScalarList(PrimitiveKind::Byte),
                ),
            ],
        );
        Self {
            traversal: ReferenceTraversal::compile(&description.members),
            description,
        }
    }

    /// Reads the reference list header; its body must hold exactly `count` references.
    fn instance_header(entity: &EntityView<'_>, input: &mut ContentReader<'_>) -> Result<ListHeader> {
        let header = input.read_list_header()?;
        if header.element_count.checked_mul(REFERENCE_LENGTH as u64) != Some(header.body_length()) {
            return Err(SwizzleError::Format(format!(
                "roots {} declare {} references in a {} byte block",
                entity.oid(),
                header.element_count,
                header.body_length()
            )));
        }
        Ok(header)
    }

    fn read_names(entity: &EntityView<'_>, input: &mut ContentReader<'_>) -> Result<Vec<String>> {
        let header = input.read_list_header()?;
        if header.element_count != header.body_length() {
            return Err(SwizzleError::Format(format!(
                "roots {} declare {} name bytes in a {} byte block",
                entity.oid(),
                header.element_count,
                header.body_length()
            )));
        }
        let bytes = input.read_bytes(header.element_count as usize)?;
        let Some(body) = bytes.strip_suffix(&[NAME_TERMINATOR]) else {
            return if bytes.is_empty() {
                Ok(Vec::new())
            } else {
                Err(SwizzleError::Format(format!(
                    "root names of {} are not terminated",
                    entity.oid()
                )))
            };
        };
        body.split(|b| *b == NAME_TERMINATOR)
            .map(|name| {
                String::from_utf8(name.to_vec()).map_err(|e| {
                    SwizzleError::Format(format!(
                        "root name in {} is not valid UTF-8: {e}",
                        entity.oid()
                    ))
                })
            })
            .collect()
    }
}

impl Default for RootsHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RootsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootsHandler")
    }
}

impl TypeHandler for RootsHandler {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<Roots>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<Roots>(instance)?;
        let roots = handle.read();
        let count = roots.len();
        let name_bytes = roots.name_bytes();
        let mut out = sink.begin(
            LIST_HEADER_LENGTH + count * REFERENCE_LENGTH + LIST_HEADER_LENGTH + name_bytes,
        )?;
        write_list(
            &mut out,
            count,
            REFERENCE_LENGTH,
            roots.entries.iter(),
            |(_, root), out| {
                let oid = storer.apply(root)?;
                out.put_oid(oid)
            },
        )?;
        out.put_list_header(ListHeader::new(name_bytes, name_bytes))?;
        for (name, _) in &roots.entries {
            out.put_bytes(name.as_bytes())?;
            out.put_u8(NAME_TERMINATOR)?;
        }
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        let header = Self::instance_header(entity, &mut entity.reader())?;
        Ok(Handle::new(Roots {
            entries: Vec::with_capacity(header.element_count as usize),
        })
        .to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        let handle = expect_instance::<Roots>(instance)?;
        let mut input = entity.reader();
        let header = Self::instance_header(entity, &mut input)?;
        let mut oids = Vec::with_capacity(header.element_count as usize);
        for _ in 0..header.element_count {
            oids.push(input.read_oid()?);
        }
        let names = Self::read_names(entity, &mut input)?;
        if names.len() != oids.len() {
            return Err(SwizzleError::Format(format!(
                "roots {} carry {} names for {} references",
                entity.oid(),
                names.len(),
                oids.len()
            )));
        }

        let mut entries = Vec::with_capacity(names.len());
        for (name, oid) in names.into_iter().zip(oids) {
            match resolver.resolve(oid)? {
                Some(root) => entries.push((name, root)),
                None => debug!(%name, "dropping null root"),
            }
        }
        handle.write().entries = entries;
        Ok(None)
    }
}

/// Picks the roots entity with the highest object id; a later entity of the same id wins.
pub(crate) fn latest_roots<'a>(
    entities: impl Iterator<Item = EntityView<'a>>,
    roots_tid: Tid,
) -> Option<EntityView<'a>> {
    entities
        .filter(|entity| entity.tid() == roots_tid)
        .fold(None, |latest: Option<EntityView<'a>>, entity| match latest {
            Some(current) if current.oid() > entity.oid() => Some(current),
            _ => Some(entity),
        })
}
