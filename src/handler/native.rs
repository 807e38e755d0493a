//! Handlers for built-in value types.
//!
//! These types hold no references: boxed primitives, `String`, `Duration`, `SystemTime` and
//! the stateless unit type. They share one generic handler, [`ValueHandler`], parameterized
//! by a [`ValueCodec`].

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chunk::EntitySink;
use crate::element::Element;
use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter, EntityView, ListHeader};
use crate::graph::Oid;
use crate::handler::{
    ObjectResolver, ObjectStorer, PendingCompletion, TypeHandler, expect_instance,
};
use crate::layout::{MemberDescriptor, MemberKind, PrimitiveKind, TypeDescription};
use crate::object::{Handle, Instance, Persistable};
use crate::traverse::ReferenceTraversal;

/// Encoding of a reference-free value type.
pub trait ValueCodec: Persistable {
    /// Members of the persisted layout.
    fn members() -> Vec<MemberDescriptor>;

    /// The value of a freshly created instance.
    fn blank() -> Self;

    /// Content length of the encoded value.
    fn encoded_length(&self) -> usize;

    /// Writes the content.
    fn encode(&self, out: &mut ContentWriter<'_>) -> Result<()>;

    /// Reads the content.
    fn decode(entity: &EntityView<'_>) -> Result<Self>;

    /// Blank value sized from the entity. Defaults to [`ValueCodec::blank`].
    fn allocate(_entity: &EntityView<'_>) -> Result<Self> {
        Ok(Self::blank())
    }
}

/// Handler for any [`ValueCodec`] type.
pub struct ValueHandler<T> {
    description: TypeDescription,
    traversal: ReferenceTraversal,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ValueCodec> ValueHandler<T> {
    /// Creates the handler.
    pub fn new() -> Self {
        let description = TypeDescription::new(T::type_name(), T::members());
        Self {
            traversal: ReferenceTraversal::compile(&description.members),
            description,
            _marker: PhantomData,
        }
    }

    /// Creates the handler, erased.
    pub fn shared() -> Result<Arc<dyn TypeHandler>> {
        Ok(Arc::new(Self::new()))
    }
}

impl<T: ValueCodec> Default for ValueHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ValueHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueHandler<{}>", self.description.type_name)
    }
}

impl<T: ValueCodec> TypeHandler for ValueHandler<T> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn store(&self, sink: EntitySink<'_>, instance: &Instance, _: &mut dyn ObjectStorer) -> Result<()> {
        let handle = expect_instance::<T>(instance)?;
        let value = handle.read();
        let mut out = sink.begin(value.encoded_length())?;
        value.encode(&mut out)?;
        out.finish()
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        Ok(Handle::new(T::allocate(entity)?).to_instance())
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        _: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        let handle = expect_instance::<T>(instance)?;
        let value = T::decode(entity)?;
        *handle.write() = value;
        Ok(None)
    }
}

// Primitives never reference anything, so these only guard against misuse.
struct NoReferences;

impl ObjectStorer for NoReferences {
    fn apply(&mut self, instance: &Instance) -> Result<Oid> {
        Err(SwizzleError::Internal(format!(
            "value type referenced {}",
            instance.type_name()
        )))
    }

    fn apply_eager(&mut self, instance: &Instance) -> Result<Oid> {
        self.apply(instance)
    }
}

impl ObjectResolver for NoReferences {
    fn resolve(&self, oid: Oid) -> Result<Option<Instance>> {
        Err(SwizzleError::Internal(format!("value type resolved {oid}")))
    }
}

macro_rules! boxed_primitive {
    ($($ty:ty),* $(,)?) => {$(
        impl Persistable for $ty {
            fn type_name() -> String {
                <$ty as Element>::label()
            }

            fn create_handler() -> Result<Arc<dyn TypeHandler>> {
                ValueHandler::<$ty>::shared()
            }
        }

        impl ValueCodec for $ty {
            fn members() -> Vec<MemberDescriptor> {
                vec![MemberDescriptor::new(
                    "value",
                    <$ty as Element>::label(),
                    <$ty as Element>::member_kind(),
                )]
            }

            fn blank() -> Self {
                <$ty as crate::element::Field>::blank()
            }

            fn encoded_length(&self) -> usize {
                <$ty as Element>::width()
            }

            fn encode(&self, out: &mut ContentWriter<'_>) -> Result<()> {
                Element::store(self, out, &mut NoReferences)
            }

            fn decode(entity: &EntityView<'_>) -> Result<Self> {
                <$ty as Element>::load(&mut entity.reader(), &NoReferences)
            }
        }
    )*};
}

boxed_primitive!(bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, char);

impl Persistable for String {
    fn type_name() -> String {
        "String".to_string()
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        ValueHandler::<String>::shared()
    }
}

impl ValueCodec for String {
    fn members() -> Vec<MemberDescriptor> {
        vec![MemberDescriptor::new(
            "utf8",
            "[u8]",
            MemberKind::ScalarList(PrimitiveKind::Byte),
        )]
    }

    fn blank() -> Self {
        String::new()
    }

    fn encoded_length(&self) -> usize {
        ListHeader::new(self.len(), self.len()).byte_length as usize
    }

    fn encode(&self, out: &mut ContentWriter<'_>) -> Result<()> {
        out.put_list_header(ListHeader::new(self.len(), self.len()))?;
        out.put_bytes(self.as_bytes())
    }

    fn decode(entity: &EntityView<'_>) -> Result<Self> {
        let mut input = entity.reader();
        let header = utf8_header(entity, &mut input)?;
        let bytes = input.read_bytes(header.element_count as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            SwizzleError::Format(format!("string {} is not valid UTF-8: {e}", entity.oid()))
        })
    }

    fn allocate(entity: &EntityView<'_>) -> Result<Self> {
        let header = utf8_header(entity, &mut entity.reader())?;
        Ok(String::with_capacity(header.element_count as usize))
    }
}

/// Reads the byte list header of a string; its count must equal its body length.
fn utf8_header(entity: &EntityView<'_>, input: &mut ContentReader<'_>) -> Result<ListHeader> {
    let header = input.read_list_header()?;
    if header.body_length() != header.element_count {
        return Err(SwizzleError::Format(format!(
            "string {} declares {} bytes in a {} byte block",
            entity.oid(),
            header.element_count,
            header.body_length()
        )));
    }
    Ok(header)
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

fn seconds_and_nanos() -> Vec<MemberDescriptor> {
    vec![
        MemberDescriptor::new("seconds", "i64", MemberKind::Primitive(PrimitiveKind::Long)),
        MemberDescriptor::new("nanos", "u32", MemberKind::Primitive(PrimitiveKind::Int)),
    ]
}

fn read_seconds_and_nanos(entity: &EntityView<'_>) -> Result<(i64, u32)> {
    let mut input = entity.reader();
    let seconds = input.read_u64()? as i64;
    let nanos = input.read_u32()?;
    if nanos >= NANOS_PER_SEC {
        return Err(SwizzleError::Format(format!(
            "{} carries {nanos} sub-second nanos",
            entity.oid()
        )));
    }
    Ok((seconds, nanos))
}

impl Persistable for Duration {
    fn type_name() -> String {
        "Duration".to_string()
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        ValueHandler::<Duration>::shared()
    }
}

impl ValueCodec for Duration {
    fn members() -> Vec<MemberDescriptor> {
        seconds_and_nanos()
    }

    fn blank() -> Self {
        Duration::ZERO
    }

    fn encoded_length(&self) -> usize {
        12
    }

    fn encode(&self, out: &mut ContentWriter<'_>) -> Result<()> {
        out.put_u64(self.as_secs())?;
        out.put_u32(self.subsec_nanos())
    }

    fn decode(entity: &EntityView<'_>) -> Result<Self> {
        let (seconds, nanos) = read_seconds_and_nanos(entity)?;
        Ok(Duration::new(seconds as u64, nanos))
    }
}

impl Persistable for SystemTime {
    fn type_name() -> String {
        "SystemTime".to_string()
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        ValueHandler::<SystemTime>::shared()
    }
}

impl ValueCodec for SystemTime {
    fn members() -> Vec<MemberDescriptor> {
        seconds_and_nanos()
    }

    fn blank() -> Self {
        UNIX_EPOCH
    }

    fn encoded_length(&self) -> usize {
        12
    }

    // Times before the epoch are stored as negative seconds plus non-negative nanos.
    fn encode(&self, out: &mut ContentWriter<'_>) -> Result<()> {
        let (seconds, nanos) = match self.duration_since(UNIX_EPOCH) {
            Ok(after) => (after.as_secs() as i64, after.subsec_nanos()),
            Err(e) => {
                let before = e.duration();
                let seconds = -(before.as_secs() as i64);
                match before.subsec_nanos() {
                    0 => (seconds, 0),
                    n => (seconds - 1, NANOS_PER_SEC - n),
                }
            }
        };
        out.put_u64(seconds as u64)?;
        out.put_u32(nanos)
    }

    fn decode(entity: &EntityView<'_>) -> Result<Self> {
        let (seconds, nanos) = read_seconds_and_nanos(entity)?;
        let whole = if seconds >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(seconds as u64))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_secs(seconds.unsigned_abs()))
        };
        whole
            .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
            .ok_or_else(|| {
                SwizzleError::Format(format!("{} is outside the system time range", entity.oid()))
            })
    }
}

impl Persistable for () {
    fn type_name() -> String {
        "()".to_string()
    }

    fn create_handler() -> Result<Arc<dyn TypeHandler>> {
        ValueHandler::<()>::shared()
    }
}

impl ValueCodec for () {
    fn members() -> Vec<MemberDescriptor> {
        Vec::new()
    }

    fn blank() -> Self {}

    fn encoded_length(&self) -> usize {
        0
    }

    fn encode(&self, _: &mut ContentWriter<'_>) -> Result<()> {
        Ok(())
    }

    fn decode(_: &EntityView<'_>) -> Result<Self> {
        Ok(())
    }
}
