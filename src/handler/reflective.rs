//! Handler derivation for plain structs and enums.
//!
//! A type describes its fields once through [`Reflective::describe`], usually generated by
//! `#[derive(Persistable)]`. [`ReflectiveHandler::derive`] turns that description into a
//! fixed layout:
//!
//! - reference fields first, then primitive fields, each group keeping declaration order,
//! - one binary offset per field, content length as the sum of the widths,
//! - one store and one load codec per field, selected by the field's element type.
//!
//! The reference-first order means that graph traversal reads the leading `8 * R` bytes and
//! never touches primitive data.
//!
//! Enums persist an `ordinal` member (the variant index) followed by the fields of every
//! variant; the fields of inactive variants hold blank values. On load the ordinal is read
//! at its binary offset first, the variant is selected, and then every field is decoded in
//! binary order, each one applied only if it belongs to the selected variant.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::chunk::EntitySink;
use crate::element::{EagerStorer, Element, Field};
use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter, EntityView};
use crate::handler::{
    ObjectResolver, ObjectStorer, PendingCompletion, TypeHandler, expect_instance,
};
use crate::layout::{MemberDescriptor, MemberKind, TypeDescription};
use crate::object::{Handle, Instance, Persistable};
use crate::registry::TypeRegistry;
use crate::traverse::ReferenceTraversal;

/// Explicit field layout of a struct or enum, the replacement for runtime reflection.
pub trait Reflective: Persistable {
    /// Declares every persisted field, in declaration order.
    fn describe(layout: &mut LayoutBuilder<Self>);

    /// A value with every persisted field in its blank state.
    fn blank() -> Self;
}

type StoreFn<T> =
    Box<dyn Fn(&T, &mut ContentWriter<'_>, &mut dyn ObjectStorer) -> Result<()> + Send + Sync>;
type LoadFn<T> =
    Box<dyn Fn(&mut T, &mut ContentReader<'_>, &dyn ObjectResolver) -> Result<()> + Send + Sync>;
type SelectFn<T> = fn(&mut T, u32) -> Result<()>;

struct FieldSpec<T> {
    member: MemberDescriptor,
    traversed: MemberDescriptor,
    width: usize,
    store: StoreFn<T>,
    load: LoadFn<T>,
    register: fn(&TypeRegistry) -> Result<()>,
}

/// Name of the member holding an enum's variant index.
pub const ORDINAL_MEMBER: &str = "ordinal";

/// Collects the field accessors of a [`Reflective`] type.
pub struct LayoutBuilder<T> {
    fields: Vec<FieldSpec<T>>,
    select: Option<SelectFn<T>>,
}

impl<T: 'static> LayoutBuilder<T> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            select: None,
        }
    }

    /// Declares a field.
    pub fn field<E: Field>(
        &mut self,
        name: &str,
        get: fn(&T) -> &E,
        get_mut: fn(&mut T) -> &mut E,
    ) -> &mut Self {
        self.push::<E>(
            name,
            Box::new(
                move |value: &T, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer| {
                    get(value).store(out, storer)
                },
            ),
            Self::field_load(get_mut),
        )
    }

    /// Declares a field whose references are always stored again, even when the shared
    /// registry already knows them.
    pub fn eager_field<E: Field>(
        &mut self,
        name: &str,
        get: fn(&T) -> &E,
        get_mut: fn(&mut T) -> &mut E,
    ) -> &mut Self {
        self.push::<E>(
            name,
            Box::new(
                move |value: &T, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer| {
                    get(value).store(out, &mut EagerStorer::new(storer))
                },
            ),
            Self::field_load(get_mut),
        )
    }

    /// Declares the variant index of an enum. `select` replaces the value with a blank
    /// instance of the given variant and fails for an unknown index.
    pub fn discriminant(&mut self, ordinal: fn(&T) -> u32, select: SelectFn<T>) -> &mut Self {
        self.select = Some(select);
        self.push::<u32>(
            ORDINAL_MEMBER,
            Box::new(move |value: &T, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer| {
                ordinal(value).store(out, storer)
            }),
            // Applied ahead of the other fields; only consumed here.
            Box::new(
                |_: &mut T, input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver| {
                    u32::load(input, resolver).map(|_| ())
                },
            ),
        )
    }

    /// Declares a field of one enum variant. `get` and `get_mut` return `None` while another
    /// variant is active; the field is then stored blank and skipped on load.
    pub fn variant_field<E: Field>(
        &mut self,
        name: &str,
        get: fn(&T) -> Option<&E>,
        get_mut: fn(&mut T) -> Option<&mut E>,
    ) -> &mut Self {
        self.push::<E>(
            name,
            Box::new(
                move |value: &T, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer| {
                    match get(value) {
                        Some(field) => field.store(out, storer),
                        None => E::blank().store(out, storer),
                    }
                },
            ),
            Self::variant_load(get_mut),
        )
    }

    /// Eager counterpart of [`LayoutBuilder::variant_field`].
    pub fn eager_variant_field<E: Field>(
        &mut self,
        name: &str,
        get: fn(&T) -> Option<&E>,
        get_mut: fn(&mut T) -> Option<&mut E>,
    ) -> &mut Self {
        self.push::<E>(
            name,
            Box::new(
                move |value: &T, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer| {
                    let mut eager = EagerStorer::new(storer);
                    match get(value) {
                        Some(field) => field.store(out, &mut eager),
                        None => E::blank().store(out, &mut eager),
                    }
                },
            ),
            Self::variant_load(get_mut),
        )
    }

    fn variant_load<E: Field>(get_mut: fn(&mut T) -> Option<&mut E>) -> LoadFn<T> {
        Box::new(
            move |value: &mut T, input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver| {
                let loaded = E::load(input, resolver)?;
                if let Some(slot) = get_mut(value) {
                    *slot = loaded;
                }
                Ok(())
            },
        )
    }

    fn field_load<E: Field>(get_mut: fn(&mut T) -> &mut E) -> LoadFn<T> {
        Box::new(
            move |value: &mut T, input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver| {
                *get_mut(value) = E::load(input, resolver)?;
                Ok(())
            },
        )
    }

    fn push<E: Element>(&mut self, name: &str, store: StoreFn<T>, load: LoadFn<T>) -> &mut Self {
        self.fields.push(FieldSpec {
            width: E::width(),
            member: MemberDescriptor::new(name, E::label(), E::member_kind()),
            traversed: MemberDescriptor::new(name, E::label(), E::traversed_kind()),
            store,
            load,
            register: E::register_types,
        });
        self
    }
}

/// Handler derived from a [`Reflective`] layout.
pub struct ReflectiveHandler<T> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    fields: Vec<FieldSpec<T>>,
    /// Binary offset of the ordinal and the variant selector, for enums.
    ordinal: Option<(usize, SelectFn<T>)>,
    content_length: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Reflective> ReflectiveHandler<T> {
    /// Derives the layout of `T`.
    pub fn derive() -> Result<Self> {
        let mut layout = LayoutBuilder::new();
        T::describe(&mut layout);

        let (mut fields, primitives): (Vec<_>, Vec<_>) = layout
            .fields
            .into_iter()
            .partition(|f| f.member.kind == MemberKind::Reference);
        fields.extend(primitives);

        let mut offsets = Vec::with_capacity(fields.len());
        let mut content_length = 0;
        for field in &fields {
            offsets.push(content_length);
            content_length += field.width;
        }
        let ordinal = match layout.select {
            Some(select) => {
                let index = fields
                    .iter()
                    .position(|f| f.member.name == ORDINAL_MEMBER)
                    .ok_or_else(|| SwizzleError::TypeNotPersistable {
                        type_name: T::type_name(),
                        reason: "an enum layout without an ordinal member".into(),
                    })?;
                Some((offsets[index], select))
            }
            None => None,
        };

        let description = TypeDescription::new(
            T::type_name(),
            fields.iter().map(|f| f.member.clone()).collect(),
        );
        description.validate()?;
        let traversed: Vec<MemberDescriptor> = fields.iter().map(|f| f.traversed.clone()).collect();
        let traversal = ReferenceTraversal::compile(&traversed);
        trace!(
            type_name = %description.type_name,
            fields = fields.len(),
            content_length,
            enumeration = ordinal.is_some(),
            "derived reflective layout"
        );

        Ok(Self {
            description,
            traversal,
            fields,
            ordinal,
            content_length,
            _marker: PhantomData,
        })
    }

    /// Fixed content length of every entity of this type.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Selects the persisted variant of an enum before its fields are applied.
    fn select_variant(&self, entity: &EntityView<'_>, value: &mut T) -> Result<()> {
        let Some((offset, select)) = self.ordinal else {
            return Ok(());
        };
        let content = entity.content();
        let slot = content.get(offset..).ok_or_else(|| {
            SwizzleError::Format(format!(
                "{} is too short for the ordinal at offset {offset}",
                entity.oid()
            ))
        })?;
        let ordinal = ContentReader::new(slot).read_u32()?;
        select(value, ordinal)
    }
}

/// Derives and erases the handler of a reflective type. Called by generated code.
pub fn reflective_handler<T: Reflective>() -> Result<Arc<dyn TypeHandler>> {
    Ok(Arc::new(ReflectiveHandler::<T>::derive()?))
}

impl<T> fmt::Debug for ReflectiveHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectiveHandler")
            .field("type_name", &self.description.type_name)
            .field("enumeration", &self.ordinal.is_some())
            .field("content_length", &self.content_length)
            .finish()
    }
}

impl<T: Reflective> TypeHandler for ReflectiveHandler<T> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn store(
        &self,
        sink: EntitySink<'_>,
        instance: &Instance,
        storer: &mut dyn ObjectStorer,
    ) -> Result<()> {
        let handle = expect_instance::<T>(instance)?;
        let value = handle.read();
        let mut out = sink.begin(self.content_length)?;
        for field in &self.fields {
            (field.store)(&*value, &mut out, storer)?;
        }
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        Ok(Handle::new(T::blank()).to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        let handle = expect_instance::<T>(instance)?;
        let mut input = entity.reader();
        let mut value = handle.write();
        self.select_variant(entity, &mut value)?;
        for field in &self.fields {
            (field.load)(&mut *value, &mut input, resolver)?;
        }
        Ok(None)
    }

    fn register_dependencies(&self, types: &TypeRegistry) -> Result<()> {
        self.fields.iter().try_for_each(|field| (field.register)(types))
    }
}
