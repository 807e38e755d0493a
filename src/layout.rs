//! Member descriptors: the persisted shape of a type.
//!
//! A [`TypeDescription`] is an ordered list of [`MemberDescriptor`]s. Each member is a fixed
//! primitive, a reference, or a variable-length list; the list forms carry their own nested
//! element layout. Descriptions are what the type dictionary records per type id and what the
//! legacy mapper compares when a layout changed.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter, LIST_HEADER_LENGTH, REFERENCE_LENGTH};

/// The eight primitive kinds of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// One byte, 0 or 1.
    Boolean,
    /// Signed 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit code unit.
    Char,
    /// Signed 32-bit integer.
    Int,
    /// Signed 64-bit integer.
    Long,
    /// IEEE 754 single precision.
    Float,
    /// IEEE 754 double precision.
    Double,
}

impl PrimitiveKind {
    /// All kinds, in wire order.
    pub const ALL: [PrimitiveKind; 8] = [
        Self::Boolean,
        Self::Byte,
        Self::Short,
        Self::Char,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
    ];

    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Short | Self::Char => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Lowercase name used in descriptions and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Char => "char",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Char | Self::Int | Self::Long
        )
    }
}

/// One decoded primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `short`
    Short(i16),
    /// `char`
    Char(u16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
}

impl PrimitiveValue {
    /// The kind of this value.
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Boolean(_) => PrimitiveKind::Boolean,
            Self::Byte(_) => PrimitiveKind::Byte,
            Self::Short(_) => PrimitiveKind::Short,
            Self::Char(_) => PrimitiveKind::Char,
            Self::Int(_) => PrimitiveKind::Int,
            Self::Long(_) => PrimitiveKind::Long,
            Self::Float(_) => PrimitiveKind::Float,
            Self::Double(_) => PrimitiveKind::Double,
        }
    }

    /// Decodes a value of `kind` at the reader's position.
    pub fn read(kind: PrimitiveKind, input: &mut ContentReader<'_>) -> Result<Self> {
        Ok(match kind {
            PrimitiveKind::Boolean => Self::Boolean(input.read_u8()? != 0),
            PrimitiveKind::Byte => Self::Byte(input.read_u8()? as i8),
            PrimitiveKind::Short => Self::Short(input.read_u16()? as i16),
            PrimitiveKind::Char => Self::Char(input.read_u16()?),
            PrimitiveKind::Int => Self::Int(input.read_u32()? as i32),
            PrimitiveKind::Long => Self::Long(input.read_u64()? as i64),
            PrimitiveKind::Float => Self::Float(f32::from_bits(input.read_u32()?)),
            PrimitiveKind::Double => Self::Double(f64::from_bits(input.read_u64()?)),
        })
    }

    /// Encodes the value at the writer's position.
    pub fn write(&self, out: &mut ContentWriter<'_>) -> Result<()> {
        match *self {
            Self::Boolean(v) => out.put_u8(u8::from(v)),
            Self::Byte(v) => out.put_u8(v as u8),
            Self::Short(v) => out.put_u16(v as u16),
            Self::Char(v) => out.put_u16(v),
            Self::Int(v) => out.put_u32(v as u32),
            Self::Long(v) => out.put_u64(v as u64),
            Self::Float(v) => out.put_u32(v.to_bits()),
            Self::Double(v) => out.put_u64(v.to_bits()),
        }
    }

    /// Integral view of a boolean or integer value. Char zero-extends.
    fn integral(&self) -> i64 {
        match *self {
            Self::Boolean(v) => i64::from(v),
            Self::Byte(v) => i64::from(v),
            Self::Short(v) => i64::from(v),
            Self::Char(v) => i64::from(v),
            Self::Int(v) => i64::from(v),
            Self::Long(v) => v,
            Self::Float(v) => v as i64,
            Self::Double(v) => v as i64,
        }
    }

    fn from_integral(value: i64, kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Boolean => Self::Boolean(value != 0),
            PrimitiveKind::Byte => Self::Byte(value as i8),
            PrimitiveKind::Short => Self::Short(value as i16),
            PrimitiveKind::Char => Self::Char(value as u16),
            PrimitiveKind::Int => Self::Int(value as i32),
            PrimitiveKind::Long => Self::Long(value),
            PrimitiveKind::Float => Self::Float(value as f32),
            PrimitiveKind::Double => Self::Double(value as f64),
        }
    }

    /// Converts to `target` with widening and narrowing cast semantics.
    ///
    /// Integers narrow by truncation, booleans become 1 or 0, anything becomes `true` when
    /// non-zero, and floating point values convert to integers through a saturating
    /// `int` (or `long`) cast before narrowing.
    pub fn convert(self, target: PrimitiveKind) -> Self {
        if self.kind() == target {
            return self;
        }
        match (self, target) {
            (Self::Float(v), PrimitiveKind::Boolean) => Self::Boolean(v != 0.0),
            (Self::Double(v), PrimitiveKind::Boolean) => Self::Boolean(v != 0.0),
            (Self::Float(v), PrimitiveKind::Long) => Self::Long(v as i64),
            (Self::Double(v), PrimitiveKind::Long) => Self::Long(v as i64),
            (Self::Float(v), kind) if kind.is_integral() => {
                Self::from_integral(i64::from(v as i32), kind)
            }
            (Self::Double(v), kind) if kind.is_integral() => {
                Self::from_integral(i64::from(v as i32), kind)
            }
            (Self::Float(v), PrimitiveKind::Double) => Self::Double(f64::from(v)),
            (Self::Double(v), PrimitiveKind::Float) => Self::Float(v as f32),
            (other, kind) => Self::from_integral(other.integral(), kind),
        }
    }
}

/// Layout category of one member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// A fixed-width primitive.
    Primitive(PrimitiveKind),
    /// An 8-byte object id.
    Reference,
    /// A variable-length list of primitives of one kind.
    ScalarList(PrimitiveKind),
    /// A variable-length list of element groups, each laid out as the nested members.
    ComplexList(Vec<MemberDescriptor>),
}

impl MemberKind {
    /// Width of a fixed member, `None` for lists.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Primitive(kind) => Some(kind.width()),
            Self::Reference => Some(REFERENCE_LENGTH),
            Self::ScalarList(_) | Self::ComplexList(_) => None,
        }
    }

    /// True if references occur at any nesting depth.
    pub fn has_references(&self) -> bool {
        match self {
            Self::Reference => true,
            Self::Primitive(_) | Self::ScalarList(_) => false,
            Self::ComplexList(members) => members.iter().any(|m| m.kind.has_references()),
        }
    }

    /// Short category name for error messages.
    pub fn category(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.name().to_string(),
            Self::Reference => "reference".to_string(),
            Self::ScalarList(kind) => format!("[{}]", kind.name()),
            Self::ComplexList(_) => "[complex]".to_string(),
        }
    }
}

/// One unit of binary layout: a named fixed field, reference or list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberDescriptor {
    /// Member name, matched by name during legacy mapping.
    pub name: String,
    /// Declared type label, informational.
    pub type_label: String,
    /// Layout category.
    pub kind: MemberKind,
}

impl MemberDescriptor {
    /// Creates a descriptor.
    pub fn new(name: impl Into<String>, type_label: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            type_label: type_label.into(),
            kind,
        }
    }

    /// Minimum persisted length: the width, or an empty list header.
    pub fn min_length(&self) -> u64 {
        self.kind
            .fixed_width()
            .map_or(LIST_HEADER_LENGTH as u64, |w| w as u64)
    }

    /// Maximum persisted length: the width, or unbounded for lists.
    pub fn max_length(&self) -> u64 {
        self.kind.fixed_width().map_or(u64::MAX, |w| w as u64)
    }
}

/// The persisted layout of one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescription {
    /// Persistent type name.
    pub type_name: String,
    /// Members in binary order.
    pub members: Vec<MemberDescriptor>,
}

impl TypeDescription {
    /// Creates a description.
    pub fn new(type_name: impl Into<String>, members: Vec<MemberDescriptor>) -> Self {
        Self {
            type_name: type_name.into(),
            members,
        }
    }

    /// Sum of the members' minimum lengths.
    pub fn min_length(&self) -> u64 {
        self.members.iter().map(MemberDescriptor::min_length).sum()
    }

    /// Saturating sum of the members' maximum lengths.
    pub fn max_length(&self) -> u64 {
        self.members
            .iter()
            .fold(0u64, |acc, m| acc.saturating_add(m.max_length()))
    }

    /// True if every member has a fixed width.
    pub fn is_fixed_length(&self) -> bool {
        self.members.iter().all(|m| m.kind.fixed_width().is_some())
    }

    /// True if any member holds references.
    pub fn has_references(&self) -> bool {
        self.members.iter().any(|m| m.kind.has_references())
    }

    /// Content offset of every member, `None` if the layout has a variable-length member.
    pub fn member_offsets(&self) -> Option<Vec<usize>> {
        let mut offset = 0;
        let mut offsets = Vec::with_capacity(self.members.len());
        for member in &self.members {
            offsets.push(offset);
            offset += member.kind.fixed_width()?;
        }
        Some(offsets)
    }

    /// Finds a member by name.
    pub fn member(&self, name: &str) -> Option<(usize, &MemberDescriptor)> {
        self.members.iter().enumerate().find(|(_, m)| m.name == name)
    }

    /// Hash of the member layout, independent of the type name.
    pub fn layout_fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        self.members.hash(&mut hasher);
        hasher.finish()
    }

    /// Rejects descriptions that cannot be laid out, such as duplicate member names.
    pub fn validate(&self) -> Result<()> {
        for (i, member) in self.members.iter().enumerate() {
            if self.members[..i].iter().any(|m| m.name == member.name) {
                return Err(SwizzleError::TypeNotPersistable {
                    type_name: self.type_name.clone(),
                    reason: format!("duplicate member name `{}`", member.name),
                });
            }
            if let MemberKind::ComplexList(nested) = &member.kind
                && nested.is_empty()
            {
                return Err(SwizzleError::TypeNotPersistable {
                    type_name: self.type_name.clone(),
                    reason: format!("list member `{}` has an empty element layout", member.name),
                });
            }
        }
        Ok(())
    }
}
