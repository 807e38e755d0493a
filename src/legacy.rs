//! Schema evolution: reading entities written under an older layout of a type.
//!
//! When a type's layout changes, its new layout gets a new type id and the old id stays in
//! the type dictionary. Entities carrying the old id are *legacy* entities. The
//! [`LegacyTypeMapper`] builds one [`ValueTranslator`] per legacy member:
//!
//! - primitive to primitive: converted with cast semantics into the current member's slot,
//! - reference to reference: the object id is copied, resolution happens during `update`,
//! - no current counterpart: the legacy bytes are skipped,
//! - primitive versus reference: rejected with [`SwizzleError::IncompatibleFieldKind`].
//!
//! At load time a [`LegacyTypeHandler`] rewrites each legacy entity into a scratch buffer laid
//! out like the current type and delegates to the current handler unchanged. Only fixed-length
//! layouts on both sides can be mapped this way.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::EntitySink;
use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, ContentWriter, EntityView, REFERENCE_LENGTH};
use crate::graph::{Oid, Tid};
use crate::handler::{ObjectResolver, ObjectStorer, PendingCompletion, TypeHandler};
use crate::layout::{MemberKind, PrimitiveKind, PrimitiveValue, TypeDescription};
use crate::object::Instance;
use crate::traverse::ReferenceTraversal;

/// Renames applied when matching legacy layouts to current types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefactoringMapping {
    type_renames: HashMap<String, String>,
    member_renames: HashMap<String, HashMap<String, String>>,
}

impl RefactoringMapping {
    /// An empty mapping: names match as they are.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps legacy type name `from` to current type name `to`.
    pub fn rename_type(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.type_renames.insert(from.into(), to.into());
        self
    }

    /// Maps legacy member `from` of the current type `type_name` to current member `to`.
    pub fn rename_member(
        mut self,
        type_name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.member_renames
            .entry(type_name.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    /// The current name of a legacy type.
    pub fn current_type_name<'a>(&'a self, legacy: &'a str) -> &'a str {
        self.type_renames.get(legacy).map_or(legacy, String::as_str)
    }

    /// The current name of a legacy member of `type_name`.
    pub fn current_member_name<'a>(&'a self, type_name: &str, legacy: &'a str) -> &'a str {
        self.member_renames
            .get(type_name)
            .and_then(|members| members.get(legacy))
            .map_or(legacy, String::as_str)
    }
}

/// Moves one legacy member into the current layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTranslator {
    /// Converts a primitive and writes it at `target_offset`.
    Primitive {
        /// Legacy kind.
        from: PrimitiveKind,
        /// Current kind.
        to: PrimitiveKind,
        /// Offset of the current member.
        target_offset: usize,
    },
    /// Copies an object id to `target_offset`.
    Reference {
        /// Offset of the current member.
        target_offset: usize,
    },
    /// Advances past a dropped legacy member.
    Skip {
        /// Width of the legacy member.
        width: usize,
    },
}

impl ValueTranslator {
    /// Width consumed from the legacy content.
    pub fn source_width(&self) -> usize {
        match self {
            Self::Primitive { from, .. } => from.width(),
            Self::Reference { .. } => REFERENCE_LENGTH,
            Self::Skip { width } => *width,
        }
    }

    /// Reads the legacy member at the reader's position and writes its translation into
    /// `target`, the current layout's content.
    pub fn apply(&self, source: &mut ContentReader<'_>, target: &mut [u8]) -> Result<()> {
        match *self {
            Self::Primitive {
                from,
                to,
                target_offset,
            } => {
                let value = PrimitiveValue::read(from, source)?.convert(to);
                let slot = target_slot(target, target_offset, to.width())?;
                value.write(&mut ContentWriter::new(slot))
            }
            Self::Reference { target_offset } => {
                let oid = source.read_oid()?;
                let slot = target_slot(target, target_offset, REFERENCE_LENGTH)?;
                ContentWriter::new(slot).put_oid(oid)
            }
            Self::Skip { width } => source.skip(width),
        }
    }
}

fn target_slot(target: &mut [u8], offset: usize, width: usize) -> Result<&mut [u8]> {
    let len = target.len();
    target.get_mut(offset..offset + width).ok_or_else(|| {
        SwizzleError::Internal(format!(
            "translator slot {offset}+{width} outside a {len} byte layout"
        ))
    })
}

/// Translators from one legacy layout to one current layout.
#[derive(Debug, Clone)]
pub struct LegacyTypeMapping {
    legacy_tid: Tid,
    legacy: TypeDescription,
    current_tid: Tid,
    translators: Vec<ValueTranslator>,
    target_length: usize,
}

impl LegacyTypeMapping {
    /// The legacy type id.
    pub fn legacy_tid(&self) -> Tid {
        self.legacy_tid
    }

    /// The current type id.
    pub fn current_tid(&self) -> Tid {
        self.current_tid
    }

    /// One translator per legacy member, in legacy order.
    pub fn translators(&self) -> &[ValueTranslator] {
        &self.translators
    }

    /// Content length of the current layout.
    pub fn target_length(&self) -> usize {
        self.target_length
    }

    /// Rewrites legacy content into a buffer laid out like the current type. Current members
    /// without a legacy counterpart stay zero, which decodes as their blank state.
    pub fn translate(&self, legacy_content: &[u8]) -> Result<Vec<u8>> {
        let mut target = vec![0u8; self.target_length];
        let mut source = ContentReader::new(legacy_content);
        for translator in &self.translators {
            translator.apply(&mut source, &mut target)?;
        }
        Ok(target)
    }
}

/// Builds legacy mappings.
#[derive(Debug, Clone, Default)]
pub struct LegacyTypeMapper {
    refactorings: RefactoringMapping,
}

impl LegacyTypeMapper {
    /// Creates a mapper applying `refactorings`.
    pub fn new(refactorings: RefactoringMapping) -> Self {
        Self { refactorings }
    }

    /// The renames in effect.
    pub fn refactorings(&self) -> &RefactoringMapping {
        &self.refactorings
    }

    /// Builds the translators from `legacy` (stored under `legacy_tid`) to `current`.
    pub fn build(
        &self,
        legacy_tid: Tid,
        legacy: &TypeDescription,
        current_tid: Tid,
        current: &TypeDescription,
    ) -> Result<LegacyTypeMapping> {
        let unsupported = |reason: String| SwizzleError::UnsupportedSchemaEvolution {
            type_name: current.type_name.clone(),
            reason,
        };
        let offsets = current
            .member_offsets()
            .ok_or_else(|| unsupported("the current layout has variable-length members".into()))?;
        if !legacy.is_fixed_length() {
            return Err(unsupported(format!(
                "the legacy layout {legacy_tid} has variable-length members"
            )));
        }

        let mut translators = Vec::with_capacity(legacy.members.len());
        for member in &legacy.members {
            let name = self
                .refactorings
                .current_member_name(&current.type_name, &member.name);
            let Some((index, target)) = current.member(name) else {
                translators.push(ValueTranslator::Skip {
                    width: member.kind.fixed_width().unwrap_or(0),
                });
                continue;
            };
            let target_offset = offsets[index];
            let translator = match (&member.kind, &target.kind) {
                (MemberKind::Primitive(from), MemberKind::Primitive(to)) => {
                    ValueTranslator::Primitive {
                        from: *from,
                        to: *to,
                        target_offset,
                    }
                }
                (MemberKind::Reference, MemberKind::Reference) => {
                    ValueTranslator::Reference { target_offset }
                }
                (legacy_kind, current_kind) => {
                    return Err(SwizzleError::IncompatibleFieldKind {
                        type_name: current.type_name.clone(),
                        member: member.name.clone(),
                        legacy: legacy_kind.category(),
                        current: current_kind.category(),
                    });
                }
            };
            translators.push(translator);
        }

        debug!(
            type_name = %current.type_name,
            %legacy_tid,
            %current_tid,
            translators = translators.len(),
            "built legacy type mapping"
        );
        Ok(LegacyTypeMapping {
            legacy_tid,
            legacy: legacy.clone(),
            current_tid,
            translators,
            target_length: current.min_length() as usize,
        })
    }
}

/// Load-only handler for legacy entities.
#[derive(Debug)]
pub struct LegacyTypeHandler {
    mapping: LegacyTypeMapping,
    traversal: ReferenceTraversal,
    current: Arc<dyn TypeHandler>,
}

impl LegacyTypeHandler {
    /// Wraps the current handler of the mapped type.
    pub fn new(mapping: LegacyTypeMapping, current: Arc<dyn TypeHandler>) -> Self {
        Self {
            traversal: ReferenceTraversal::compile(&mapping.legacy.members),
            mapping,
            current,
        }
    }

    /// The mapping in use.
    pub fn mapping(&self) -> &LegacyTypeMapping {
        &self.mapping
    }

    fn with_translated<R>(
        &self,
        entity: &EntityView<'_>,
        f: impl FnOnce(&EntityView<'_>) -> Result<R>,
    ) -> Result<R> {
        let content = self.mapping.translate(entity.content())?;
        let view = EntityView::from_parts(self.mapping.current_tid, entity.oid(), &content);
        f(&view)
    }
}

impl TypeHandler for LegacyTypeHandler {
    fn description(&self) -> &TypeDescription {
        &self.mapping.legacy
    }

    fn traversal(&self) -> &ReferenceTraversal {
        &self.traversal
    }

    fn rust_type(&self) -> TypeId {
        self.current.rust_type()
    }

    fn store(&self, sink: EntitySink<'_>, instance: &Instance, _: &mut dyn ObjectStorer) -> Result<()> {
        Err(SwizzleError::Internal(format!(
            "legacy layout {} of {} cannot store {} as {}",
            self.mapping.legacy_tid,
            instance.type_name(),
            sink.oid(),
            self.mapping.legacy.type_name
        )))
    }

    fn create(&self, entity: &EntityView<'_>) -> Result<Instance> {
        self.validate_length(entity)?;
        self.with_translated(entity, |view| self.current.create(view))
    }

    fn update(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        resolver: &dyn ObjectResolver,
    ) -> Result<Option<PendingCompletion>> {
        self.with_translated(entity, |view| self.current.update(view, instance, resolver))
    }

    fn requires_completion(&self) -> bool {
        self.current.requires_completion()
    }

    fn complete(
        &self,
        entity: &EntityView<'_>,
        instance: &Instance,
        pending: Option<PendingCompletion>,
        resolver: &dyn ObjectResolver,
    ) -> Result<()> {
        self.with_translated(entity, |view| {
            self.current.complete(view, instance, pending, resolver)
        })
    }

    fn iterate_references(
        &self,
        entity: &EntityView<'_>,
        acceptor: &mut dyn FnMut(Oid),
    ) -> Result<()> {
        self.traversal.iterate(entity.content(), acceptor)
    }
}
