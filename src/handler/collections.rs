//! Handlers for vectors, fixed arrays, sets and maps.
//!
//! All collections share the list encoding `[byteLength][count][elements]`. Vectors of a
//! primitive element type are scalar lists; everything else is a complex list of element
//! groups. Sets and maps cannot insert elements while referenced values are still blank, so
//! they stage the decoded elements in `update` and insert them in `complete`.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::chunk::EntitySink;
use crate::element::{Element, Field, primitive_kind_of};
use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, EntityView, LIST_HEADER_LENGTH, ListHeader, write_list};
use crate::handler::{
    ObjectResolver, ObjectStorer, PendingCompletion, TypeHandler, expect_instance,
};
use crate::layout::{MemberDescriptor, MemberKind, TypeDescription};
use crate::object::{Handle, Instance, Persistable};
use crate::registry::TypeRegistry;
use crate::traverse::ReferenceTraversal;

/// The list member holding elements of type `E`, each described as `element_kind`.
fn element_list<E: Element>(name: &str, element_kind: MemberKind) -> MemberDescriptor {
    let kind = match primitive_kind_of::<E>() {
        Some(kind) => MemberKind::ScalarList(kind),
        None => MemberKind::ComplexList(vec![MemberDescriptor::new(
            "element",
            E::label(),
            element_kind,
        )]),
    };
    MemberDescriptor::new(name, format!("[{}]", E::label()), kind)
}

/// Layout and reference traversal of a single list of `E`.
fn element_layout<E: Element>(type_name: String) -> (TypeDescription, ReferenceTraversal) {
    let description =
        TypeDescription::new(type_name, vec![element_list::<E>("elements", E::member_kind())]);
    let traversal =
        ReferenceTraversal::compile(&[element_list::<E>("elements", E::traversed_kind())]);
    (description, traversal)
}

/// Reads the leading list header and checks it against a fixed group width.
fn read_groups<'a>(
    entity: &EntityView<'a>,
    group_width: usize,
) -> Result<(ListHeader, ContentReader<'a>)> {
    let mut input = entity.reader();
    let header = input.read_list_header()?;
    let expected = header.element_count.checked_mul(group_width as u64);
    if expected != Some(header.body_length()) {
        return Err(SwizzleError::Format(format!(
            "list of {} in {} declares {} groups of {group_width} bytes in a {} byte block",
            entity.oid(),
            entity.tid(),
            header.element_count,
            header.body_length()
        )));
    }
    Ok((header, input))
}

fn list_content_length(count: usize, group_width: usize) -> usize {
    LIST_HEADER_LENGTH + count * group_width
}

/// Handler for `Vec<E>`.
pub struct ListHandler<E> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Element> ListHandler<E> {
    /// Creates the handler.
    pub fn new() -> Self {
        let (description, traversal) = element_layout::<E>(Vec::<E>::type_name());
        Self {
            description,
            traversal,
            _marker: PhantomData,
        }
    }
}

impl<E: Element> Default for ListHandler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListHandler<{}>", self.description.type_name)
    }
}

impl<E: Element> Persistable for Vec<E> {
    fn type_name() -> String {
        format!("Vec<{}>", E::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(ListHandler::<E>::new()))
    }
}

impl<E: Element> TypeHandler for ListHandler<E> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<Vec<E>>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<Vec<E>>(instance)?;
        let elements = handle.read();
        let mut out = sink.begin(list_content_length(elements.len(), E::width()))?;
        write_list(&mut out, elements.len(), E::width(), elements.iter(), |e, out| {
            e.store(out, storer)
        })?;
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        let (header, _) = read_groups(entity, E::width())?;
        Ok(Handle::new(Vec::<E>::with_capacity(header.element_count as usize)).to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        let handle = expect_instance::<Vec<E>>(instance)?;
        let (header, mut input) = read_groups(entity, E::width())?;
        let mut elements = handle.write();
        elements.clear();
        for _ in 0..header.element_count {
            elements.push(E::load(&mut input, resolver)?);
        }
        Ok(None)
    }

    fn register_dependencies(&self, types: &TypeRegistry) -> Result<()> {
        E::register_types(types)
    }
}

/// Handler for fixed-size arrays `[E; N]`.
pub struct ArrayHandler<E, const N: usize> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Field, const N: usize> ArrayHandler<E, N> {
    /// Creates the handler.
    pub fn new() -> Self {
        let (description, traversal) = element_layout::<E>(<[E; N]>::type_name());
        Self {
            description,
            traversal,
            _marker: PhantomData,
        }
    }

    fn check_capacity(entity: &EntityView<'_>, persisted: u64) -> Result<()> {
        if persisted > N as u64 {
            return Err(SwizzleError::ArrayLengthMismatch {
                oid: entity.oid(),
                capacity: N as u64,
                persisted,
            });
        }
        Ok(())
    }
}

impl<E: Field, const N: usize> Default for ArrayHandler<E, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, const N: usize> fmt::Debug for ArrayHandler<E, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayHandler<{}>", self.description.type_name)
    }
}

impl<E: Field, const N: usize> Persistable for [E; N] {
    fn type_name() -> String {
        format!("[{}; {N}]", E::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(ArrayHandler::<E, N>::new()))
    }
}

impl<E: Field, const N: usize> TypeHandler for ArrayHandler<E, N> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<[E; N]>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<[E; N]>(instance)?;
        let elements = handle.read();
        let mut out = sink.begin(list_content_length(N, E::width()))?;
        write_list(&mut out, N, E::width(), elements.iter(), |e, out| {
            e.store(out, storer)
        })?;
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        Self::check_capacity(entity, entity.leading_list()?.element_count)?;
        Ok(Handle::new(std::array::from_fn::<E, N, _>(|_| E::blank())).to_instance())
    }

    // A shorter persisted list leaves the trailing slots blank.
    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        let handle = expect_instance::<[E; N]>(instance)?;
        let (header, mut input) = read_groups(entity, E::width())?;
        Self::check_capacity(entity, header.element_count)?;
        let mut elements = handle.write();
        for slot in elements.iter_mut().take(header.element_count as usize) {
            *slot = E::load(&mut input, resolver)?;
        }
        Ok(None)
    }

    fn register_dependencies(&self, types: &TypeRegistry) -> Result<()> {
        E::register_types(types)
    }
}

/// A set type whose elements are inserted during completion.
pub trait SetCollection: Persistable {
    /// Element type.
    type Item: Element;

    /// Collection name used in the type name.
    const KIND: &'static str;

    /// An empty set.
    fn empty() -> Self;

    /// Number of elements.
    fn len(&self) -> usize;

    /// Elements in iteration order.
    fn items(&self) -> impl Iterator<Item = &Self::Item>;

    /// Inserts one element.
    fn insert_item(&mut self, item: Self::Item);
}

impl<E: Element + Eq + Hash> SetCollection for HashSet<E> {
    type Item = E;
    const KIND: &'static str = "HashSet";

    fn empty() -> Self {
        HashSet::new()
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &E> {
        self.iter()
    }

    fn insert_item(&mut self, item: E) {
        self.insert(item);
    }
}

impl<E: Element + Ord> SetCollection for BTreeSet<E> {
    type Item = E;
    const KIND: &'static str = "BTreeSet";

    fn empty() -> Self {
        BTreeSet::new()
    }

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &E> {
        self.iter()
    }

    fn insert_item(&mut self, item: E) {
        self.insert(item);
    }
}

impl<E: Element + Eq + Hash> Persistable for HashSet<E> {
    fn type_name() -> String {
        format!("{}<{}>", <Self as SetCollection>::KIND, E::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(SetHandler::<Self>::new()))
    }
}

impl<E: Element + Ord> Persistable for BTreeSet<E> {
    fn type_name() -> String {
        format!("{}<{}>", <Self as SetCollection>::KIND, E::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(SetHandler::<Self>::new()))
    }
}

/// Handler for [`SetCollection`] types.
pub struct SetHandler<S> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    _marker: PhantomData<fn() -> S>,
}

impl<S: SetCollection> SetHandler<S> {
    /// Creates the handler.
    pub fn new() -> Self {
        let (description, traversal) = element_layout::<S::Item>(S::type_name());
        Self {
            description,
            traversal,
            _marker: PhantomData,
        }
    }
}

impl<S: SetCollection> Default for SetHandler<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for SetHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetHandler<{}>", self.description.type_name)
    }
}

impl<S: SetCollection> TypeHandler for SetHandler<S> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<S>(instance)?;
        let set = handle.read();
        let width = S::Item::width();
        let mut out = sink.begin(list_content_length(set.len(), width))?;
        write_list(&mut out, set.len(), width, set.items(), |e, out| {
            e.store(out, storer)
        })?;
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        Ok(Handle::new(S::empty()).to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        expect_instance::<S>(instance)?;
        let (header, mut input) = read_groups(entity, S::Item::width())?;
        let mut staged = Vec::with_capacity(header.element_count as usize);
        for _ in 0..header.element_count {
            staged.push(S::Item::read_value(&mut input, resolver)?);
        }
        Ok(Some(PendingCompletion::Elements(staged)))
    }

    fn requires_completion(&self) -> bool {
        true
    }

    fn register_dependencies(&self, types: &TypeRegistry) -> Result<()> {
        S::Item::register_types(types)
    }

    fn complete(
        &self,
        _entity: &EntityView<'_>,
        instance: &Instance,
        pending: Option<PendingCompletion>,
        _resolver: &dyn ObjectResolver,
    ) -> Result<()> {
        let handle = expect_instance::<S>(instance)?;
        let staged = match pending {
            Some(PendingCompletion::Elements(staged)) => staged,
            Some(PendingCompletion::Entries(_)) => {
                return Err(SwizzleError::Internal(format!(
                    "set {} received map entries for completion",
                    self.description.type_name
                )));
            }
            None => return Ok(()),
        };
        let items = staged
            .into_iter()
            .map(S::Item::from_value)
            .collect::<Result<Vec<_>>>()?;
        let mut set = handle.write();
        *set = S::empty();
        for item in items {
            set.insert_item(item);
        }
        Ok(())
    }
}

/// A map type whose entries are inserted during completion.
pub trait MapCollection: Persistable {
    /// Key type.
    type Key: Element;
    /// Value type.
    type Val: Element;

    /// Collection name used in the type name.
    const KIND: &'static str;

    /// An empty map.
    fn empty() -> Self;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Entries in iteration order.
    fn entries(&self) -> impl Iterator<Item = (&Self::Key, &Self::Val)>;

    /// Inserts one entry.
    fn insert_entry(&mut self, key: Self::Key, value: Self::Val);
}

impl<K: Element + Eq + Hash, V: Element> MapCollection for HashMap<K, V> {
    type Key = K;
    type Val = V;
    const KIND: &'static str = "HashMap";

    fn empty() -> Self {
        HashMap::new()
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> {
        self.iter()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
}

impl<K: Element + Ord, V: Element> MapCollection for BTreeMap<K, V> {
    type Key = K;
    type Val = V;
    const KIND: &'static str = "BTreeMap";

    fn empty() -> Self {
        BTreeMap::new()
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> {
        self.iter()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
}

impl<K: Element + Eq + Hash, V: Element> Persistable for HashMap<K, V> {
    fn type_name() -> String {
        format!("{}<{}, {}>", <Self as MapCollection>::KIND, K::label(), V::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(MapHandler::<Self>::new()))
    }
}

impl<K: Element + Ord, V: Element> Persistable for BTreeMap<K, V> {
    fn type_name() -> String {
        format!("{}<{}, {}>", <Self as MapCollection>::KIND, K::label(), V::label())
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(MapHandler::<Self>::new()))
    }
}

/// Handler for [`MapCollection`] types.
pub struct MapHandler<M> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    _marker: PhantomData<fn() -> M>,
}

impl<M: MapCollection> MapHandler<M> {
    /// Creates the handler.
    pub fn new() -> Self {
        let description = TypeDescription::new(
            M::type_name(),
            vec![Self::entry_list(M::Key::member_kind(), M::Val::member_kind())],
        );
        let traversal = ReferenceTraversal::compile(&[Self::entry_list(
            M::Key::traversed_kind(),
            M::Val::traversed_kind(),
        )]);
        Self {
            description,
            traversal,
            _marker: PhantomData,
        }
    }

    fn entry_list(key: MemberKind, value: MemberKind) -> MemberDescriptor {
        MemberDescriptor::new(
            "entries",
            format!("[({}, {})]", M::Key::label(), M::Val::label()),
            MemberKind::ComplexList(vec![
                MemberDescriptor::new("key", M::Key::label(), key),
                MemberDescriptor::new("value", M::Val::label(), value),
            ]),
        )
    }

    fn entry_width() -> usize {
        M::Key::width() + M::Val::width()
    }
}

impl<M: MapCollection> Default for MapHandler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MapHandler<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapHandler<{}>", self.description.type_name)
    }
}

impl<M: MapCollection> TypeHandler for MapHandler<M> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<M>(instance)?;
        let map = handle.read();
        let width = Self::entry_width();
        let mut out = sink.begin(list_content_length(map.len(), width))?;
        write_list(&mut out, map.len(), width, map.entries(), |(k, v), out| {
            k.store(out, storer)?;
            v.store(out, storer)
        })?;
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        Ok(Handle::new(M::empty()).to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        expect_instance::<M>(instance)?;
        let (header, mut input) = read_groups(entity, Self::entry_width())?;
        let mut staged = Vec::with_capacity(header.element_count as usize);
        for _ in 0..header.element_count {
            let key = M::Key::read_value(&mut input, resolver)?;
            let value = M::Val::read_value(&mut input, resolver)?;
            staged.push((key, value));
        }
        Ok(Some(PendingCompletion::Entries(staged)))
    }

    fn requires_completion(&self) -> bool {
        true
    }

    fn register_dependencies(&self, types: &TypeRegistry) -> Result<()> {
        M::Key::register_types(types)?;
        M::Val::register_types(types)
    }

    fn complete(
        &self,
        _entity: &EntityView<'_>,
        instance: &Instance,
        pending: Option<PendingCompletion>,
        _resolver: &dyn ObjectResolver,
    ) -> Result<()> {
        let handle = expect_instance::<M>(instance)?;
        let staged = match pending {
            Some(PendingCompletion::Entries(staged)) => staged,
            Some(PendingCompletion::Elements(_)) => {
                return Err(SwizzleError::Internal(format!(
                    "map {} received set elements for completion",
                    self.description.type_name
                )));
            }
            None => return Ok(()),
        };
        let entries = staged
            .into_iter()
            .map(|(k, v)| Ok((M::Key::from_value(k)?, M::Val::from_value(v)?)))
            .collect::<Result<Vec<_>>>()?;
        let mut map = handle.write();
        *map = M::empty();
        for (key, value) in entries {
            map.insert_entry(key, value);
        }
        Ok(())
    }
}
