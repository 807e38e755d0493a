//! Per-field codecs.
//!
//! [`Element`] is implemented by everything that can occupy one fixed slot of an entity: the
//! primitive types and the reference types. Handlers compose elements into fields, list
//! elements and map entries; the element decides its own width and how it is encoded.
//!
//! An element also names the types it references, so that registering a type registers
//! everything its entities can point to.

use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter};
use crate::graph::Oid;
use crate::handler::lazy::LazyLink;
use crate::handler::{ObjectResolver, ObjectStorer};
use crate::layout::{MemberKind, PrimitiveKind, PrimitiveValue};
use crate::object::{AnyRef, Handle, Instance, KeyRef, Persistable, Ref};
use crate::registry::TypeRegistry;

/// One decoded slot: a primitive or a resolved reference.
#[derive(Debug, Clone)]
pub enum Value {
    /// A primitive value.
    Primitive(PrimitiveValue),
    /// A resolved reference, `None` for null.
    Reference(Option<Instance>),
    /// A lazy reference, not resolved during the load.
    Deferred(LazyLink),
}

impl Value {
    /// Decodes one fixed slot of `kind`, resolving references through `resolver`.
    pub fn read(
        kind: &MemberKind,
        input: &mut ContentReader<'_>,
        resolver: &dyn ObjectResolver,
    ) -> Result<Self> {
        match kind {
            MemberKind::Primitive(p) => PrimitiveValue::read(*p, input).map(Self::Primitive),
            MemberKind::Reference => resolver.resolve(input.read_oid()?).map(Self::Reference),
            other => Err(SwizzleError::Internal(format!(
                "{} is not a fixed element kind",
                other.category()
            ))),
        }
    }

    /// Short name of the slot category, for mismatch reports.
    pub fn category(&self) -> String {
        match self {
            Value::Primitive(p) => p.kind().name().to_string(),
            Value::Reference(_) => "reference".to_string(),
            Value::Deferred(_) => "lazy reference".to_string(),
        }
    }
}

/// A value that occupies one fixed slot of an entity.
pub trait Element: Sized + Send + Sync + 'static {
    /// Layout category: a primitive kind or a reference.
    fn member_kind() -> MemberKind;

    /// Label used in type names and member descriptors.
    fn label() -> String;

    /// Encodes the value, registering referenced instances with `storer`.
    fn store(&self, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer) -> Result<()>;

    /// Converts a decoded slot back into the element type.
    fn from_value(value: Value) -> Result<Self>;

    /// Encoded width in bytes.
    fn width() -> usize {
        Self::member_kind().fixed_width().unwrap_or(0)
    }

    /// Layout category seen by reference traversal. Slots that are not followed on load
    /// report a primitive of the same width.
    fn traversed_kind() -> MemberKind {
        Self::member_kind()
    }

    /// Registers the types this element refers to.
    fn register_types(_types: &TypeRegistry) -> Result<()> {
        Ok(())
    }

    /// Decodes one slot without converting it.
    fn read_value(input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver) -> Result<Value> {
        Value::read(&Self::member_kind(), input, resolver)
    }

    /// Decodes the value at the reader's position.
    fn load(input: &mut ContentReader<'_>, resolver: &dyn ObjectResolver) -> Result<Self> {
        Self::from_value(Self::read_value(input, resolver)?)
    }
}

/// An element with a blank state, usable as a struct field or fixed array slot.
pub trait Field: Element {
    /// The state of a freshly created, not yet populated instance.
    fn blank() -> Self;
}

fn primitive_mismatch<T>(expected: PrimitiveKind, value: &Value) -> Result<T> {
    Err(SwizzleError::TypeMismatch {
        expected: expected.name().to_string(),
        actual: value.category(),
    })
}

macro_rules! primitive_element {
    ($ty:ty, $kind:ident, $label:literal, |$v:ident| $encode:expr, |$d:ident| $decode:expr) => {
        impl Element for $ty {
            fn member_kind() -> MemberKind {
                MemberKind::Primitive(PrimitiveKind::$kind)
            }

            fn label() -> String {
                $label.to_string()
            }

            fn store(&self, out: &mut ContentWriter<'_>, _: &mut dyn ObjectStorer) -> Result<()> {
                let $v = *self;
                PrimitiveValue::$kind($encode).write(out)
            }

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Primitive(PrimitiveValue::$kind($d)) => Ok($decode),
                    other => primitive_mismatch(PrimitiveKind::$kind, &other),
                }
            }
        }

        impl Field for $ty {
            fn blank() -> Self {
                <$ty>::default()
            }
        }
    };
}

primitive_element!(bool, Boolean, "bool", |v| v, |d| d);
primitive_element!(i8, Byte, "i8", |v| v, |d| d);
primitive_element!(u8, Byte, "u8", |v| v as i8, |d| d as u8);
primitive_element!(i16, Short, "i16", |v| v, |d| d);
primitive_element!(u16, Char, "u16", |v| v, |d| d);
primitive_element!(i32, Int, "i32", |v| v, |d| d);
primitive_element!(u32, Int, "u32", |v| v as i32, |d| d as u32);
primitive_element!(i64, Long, "i64", |v| v, |d| d);
primitive_element!(u64, Long, "u64", |v| v as i64, |d| d as u64);
primitive_element!(f32, Float, "f32", |v| v, |d| d);
primitive_element!(f64, Double, "f64", |v| v, |d| d);

impl Element for char {
    fn member_kind() -> MemberKind {
        MemberKind::Primitive(PrimitiveKind::Int)
    }

    fn label() -> String {
        "char".to_string()
    }

    fn store(&self, out: &mut ContentWriter<'_>, _: &mut dyn ObjectStorer) -> Result<()> {
        PrimitiveValue::Int(u32::from(*self) as i32).write(out)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Primitive(PrimitiveValue::Int(code)) => char::from_u32(code as u32)
                .ok_or_else(|| SwizzleError::Format(format!("{code:#x} is not a unicode scalar"))),
            other => primitive_mismatch(PrimitiveKind::Int, &other),
        }
    }
}

impl Field for char {
    fn blank() -> Self {
        '\0'
    }
}

pub(crate) fn typed<T: Persistable>(instance: Instance) -> Result<Handle<T>> {
    instance
        .downcast::<T>()
        .ok_or_else(|| SwizzleError::TypeMismatch {
            expected: T::type_name(),
            actual: instance.type_name(),
        })
}

pub(crate) fn reference_mismatch<T>(label: String, value: &Value) -> Result<T> {
    Err(SwizzleError::TypeMismatch {
        expected: label,
        actual: value.category(),
    })
}

impl<T: Persistable> Element for Ref<T> {
    fn member_kind() -> MemberKind {
        MemberKind::Reference
    }

    fn label() -> String {
        format!("Ref<{}>", T::type_name())
    }

    fn register_types(types: &TypeRegistry) -> Result<()> {
        types.register::<T>().map(|_| ())
    }

    fn store(&self, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer) -> Result<()> {
        let oid = match self {
            Some(handle) => storer.apply(&handle.to_instance())?,
            None => Oid::NULL,
        };
        out.put_oid(oid)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Reference(Some(instance)) => typed(instance).map(Some),
            Value::Reference(None) => Ok(None),
            other => reference_mismatch(Self::label(), &other),
        }
    }
}

impl<T: Persistable> Field for Ref<T> {
    fn blank() -> Self {
        None
    }
}

// The target type of an `AnyRef` is only known per value; it must be registered explicitly.
impl Element for AnyRef {
    fn member_kind() -> MemberKind {
        MemberKind::Reference
    }

    fn label() -> String {
        "AnyRef".to_string()
    }

    fn store(&self, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer) -> Result<()> {
        let oid = match self {
            Some(instance) => storer.apply(instance)?,
            None => Oid::NULL,
        };
        out.put_oid(oid)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Reference(instance) => Ok(instance),
            other => reference_mismatch(Self::label(), &other),
        }
    }
}

impl Field for AnyRef {
    fn blank() -> Self {
        None
    }
}

impl<T: Persistable> Element for KeyRef<T> {
    fn member_kind() -> MemberKind {
        MemberKind::Reference
    }

    fn label() -> String {
        format!("KeyRef<{}>", T::type_name())
    }

    fn register_types(types: &TypeRegistry) -> Result<()> {
        types.register::<T>().map(|_| ())
    }

    fn store(&self, out: &mut ContentWriter<'_>, storer: &mut dyn ObjectStorer) -> Result<()> {
        let oid = storer.apply(&self.handle().to_instance())?;
        out.put_oid(oid)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Reference(Some(instance)) => typed(instance).map(KeyRef::new),
            Value::Reference(None) => Err(SwizzleError::NullElement(Self::label())),
            other => reference_mismatch(Self::label(), &other),
        }
    }
}

/// Wraps a storer so that every reference is applied eagerly.
pub(crate) struct EagerStorer<'s> {
    inner: &'s mut dyn ObjectStorer,
}

impl<'s> EagerStorer<'s> {
    pub(crate) fn new(inner: &'s mut dyn ObjectStorer) -> Self {
        Self { inner }
    }
}

impl ObjectStorer for EagerStorer<'_> {
    fn apply(&mut self, instance: &Instance) -> Result<Oid> {
        self.inner.apply_eager(instance)
    }

    fn apply_eager(&mut self, instance: &Instance) -> Result<Oid> {
        self.inner.apply_eager(instance)
    }
}

/// Primitive kind of an element type, `None` for references.
pub(crate) fn primitive_kind_of<E: Element>() -> Option<PrimitiveKind> {
    match E::member_kind() {
        MemberKind::Primitive(kind) => Some(kind),
        _ => None,
    }
}
