#![allow(missing_docs)]

use swizzle::chunk::ChunkBuffer;
use swizzle::format::{
    ContentWriter, ENTITY_HEADER_LENGTH, EntityHeader, EntityView, ListHeader, write_list,
};
use swizzle::handler::{ReflectiveHandler, TypeHandler};
use swizzle::layout::{MemberDescriptor, MemberKind, PrimitiveKind};
use swizzle::traverse::{ReferenceTraversal, TraversalStep};
use swizzle::{Handle, Oid, Persistable, Persistence, Ref, SwizzleError};

fn primitive(name: &str, kind: PrimitiveKind) -> MemberDescriptor {
    MemberDescriptor::new(name, kind.name(), MemberKind::Primitive(kind))
}

fn reference(name: &str) -> MemberDescriptor {
    MemberDescriptor::new(name, "reference", MemberKind::Reference)
}

fn complex(name: &str, members: Vec<MemberDescriptor>) -> MemberDescriptor {
    MemberDescriptor::new(name, "[complex]", MemberKind::ComplexList(members))
}

fn sample_members() -> Vec<MemberDescriptor> {
    vec![
        primitive("id", PrimitiveKind::Int),
        reference("left"),
        reference("right"),
        primitive("stamp", PrimitiveKind::Long),
        MemberDescriptor::new("bytes", "[byte]", MemberKind::ScalarList(PrimitiveKind::Byte)),
        complex("links", vec![reference("a"), reference("b")]),
        complex(
            "entries",
            vec![primitive("key", PrimitiveKind::Int), reference("value")],
        ),
        primitive("flag", PrimitiveKind::Byte),
    ]
}

// --- TRAVERSAL ---

/// Runs of the same kind merge, lists compile by content and trailing skips are cropped.
#[test]
fn test_traversal_compilation() {
    let traversal = ReferenceTraversal::compile(&sample_members());
    assert_eq!(
        traversal.steps(),
        &[
            TraversalStep::Skip(4),
            TraversalStep::References(2),
            TraversalStep::Skip(8),
            TraversalStep::SkipList,
            TraversalStep::ReferenceList,
            TraversalStep::Nested(vec![TraversalStep::Skip(4), TraversalStep::References(1)]),
        ]
    );
    assert!(traversal.has_references());
    assert_eq!(traversal.leading_references(), 0);

    let primitives_only = ReferenceTraversal::compile(&[
        primitive("a", PrimitiveKind::Int),
        complex("pairs", vec![primitive("x", PrimitiveKind::Short)]),
    ]);
    assert!(primitives_only.steps().is_empty());
    assert!(!primitives_only.has_references());
}

/// Iteration yields every non-null id, including those inside lists.
#[test]
fn test_traversal_iteration() -> swizzle::Result<()> {
    let mut content = vec![0u8; 120];
    let mut out = ContentWriter::new(&mut content);
    out.put_u32(11)?;
    out.put_oid(Oid::new(101))?;
    out.put_oid(Oid::NULL)?;
    out.put_u64(99)?;
    out.put_list_header(ListHeader::new(3, 3))?;
    out.put_bytes(&[1, 2, 3])?;
    out.put_list_header(ListHeader::new(16, 1))?;
    out.put_oid(Oid::new(102))?;
    out.put_oid(Oid::new(103))?;
    out.put_list_header(ListHeader::new(24, 2))?;
    out.put_u32(1)?;
    out.put_oid(Oid::new(104))?;
    out.put_u32(2)?;
    out.put_oid(Oid::NULL)?;
    out.put_u8(1)?;
    out.finish()?;

    let traversal = ReferenceTraversal::compile(&sample_members());
    let mut seen = Vec::new();
    traversal.iterate(&content, &mut |oid| seen.push(oid.as_u64()))?;
    assert_eq!(seen, vec![101, 102, 103, 104]);
    Ok(())
}

// --- CHUNK BUFFER ---

/// A full buffer is sealed and followed by one sized for the entity.
#[test]
fn test_chunk_buffer_growth() {
    let mut buffer = ChunkBuffer::new(64);
    buffer.allocate(10);
    assert_eq!(buffer.region_count(), 1);

    buffer.allocate(60);
    assert_eq!(buffer.region_count(), 2);

    let big = buffer.allocate(200);
    assert_eq!(big.len(), 200);
    assert_eq!(buffer.region_count(), 3);
    assert_eq!(buffer.byte_len(), 270);

    buffer.clear();
    assert_eq!(buffer.region_count(), 1);
    assert_eq!(buffer.first_capacity(), 64);
}

/// An untouched buffer is replaced instead of being stranded.
#[test]
fn test_chunk_buffer_replaces_empty_region() {
    let mut buffer = ChunkBuffer::new(64);
    buffer.allocate(100);
    assert_eq!(buffer.region_count(), 1);
    assert!(buffer.first_capacity() >= 100);
    assert_eq!(buffer.regions().count(), 1);
}

// --- ENTITY LAYOUT ---

#[derive(Persistable)]
struct Leaf {
    weight: f64,
}

#[derive(Persistable)]
struct Record {
    count: i32,
    first: Ref<Leaf>,
    scale: f64,
    second: Ref<Leaf>,
}

/// References come first in declaration order, then primitives, and the header counts both.
#[test]
fn test_reference_first_layout() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;
    let first = Handle::new(Leaf { weight: 1.0 });
    let record = Handle::new(Record {
        count: 3,
        first: Some(first.clone()),
        scale: 0.5,
        second: None,
    });
    let oid = persistence.store(&record)?;
    let first_oid = persistence
        .objects()
        .lookup_object_id(&first.to_instance())?
        .expect("first leaf stored");

    let bytes = store.entity(oid)?.expect("record entity");
    let view = EntityView::parse(&bytes)?;
    assert_eq!(view.header().total_length as usize, bytes.len());
    assert_eq!(bytes.len(), ENTITY_HEADER_LENGTH + 28);

    let handler = ReflectiveHandler::<Record>::derive()?;
    assert_eq!(handler.content_length(), 28);

    let content = view.content();
    assert_eq!(&content[0..8], &first_oid.as_u64().to_le_bytes());
    assert_eq!(&content[8..16], &[0u8; 8]);
    assert_eq!(&content[16..20], &3i32.to_le_bytes());
    assert_eq!(&content[20..28], &0.5f64.to_le_bytes());
    Ok(())
}

#[derive(Persistable)]
enum Signal {
    Idle,
    Level(i32),
    Tagged { source: Ref<Leaf>, strength: u8 },
}

/// An enum stores the variant index after its references, followed by the fields of every
/// variant; inactive ones are blank.
#[test]
fn test_enum_layout() -> swizzle::Result<()> {
    let handler = ReflectiveHandler::<Signal>::derive()?;
    let names: Vec<&str> = handler
        .description()
        .members
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(names, ["Tagged.source", "ordinal", "Level.0", "Tagged.strength"]);
    assert_eq!(handler.content_length(), 8 + 4 + 4 + 1);
    assert!(handler.traversal().has_references());

    let (persistence, store) = Persistence::in_memory()?;
    let oid = persistence.store(&Handle::new(Signal::Level(-7)))?;
    let bytes = store.entity(oid)?.expect("signal entity");
    let content = EntityView::parse(&bytes)?.content();
    assert_eq!(&content[0..8], &[0u8; 8]);
    assert_eq!(&content[8..12], &1u32.to_le_bytes());
    assert_eq!(&content[12..16], &(-7i32).to_le_bytes());
    assert_eq!(content[16], 0);

    // A variant index past the last variant is rejected.
    let mut corrupt = content.to_vec();
    corrupt[8..12].copy_from_slice(&3u32.to_le_bytes());
    let tid = persistence.register::<Signal>()?;
    let bad = Oid::new(7_000);
    let mut entity = EntityHeader::new(tid, bad, corrupt.len()).to_bytes().to_vec();
    entity.extend_from_slice(&corrupt);
    store.insert_raw(&entity)?;
    let result = persistence.load::<Signal>(bad);
    assert!(matches!(result, Err(SwizzleError::Format(_))));
    Ok(())
}

/// A list source that yields more elements than announced is rejected.
#[test]
fn test_inconsistent_element_count() {
    let mut content = vec![0u8; 24];
    let mut out = ContentWriter::new(&mut content);
    let result = write_list(&mut out, 2, 4, [1u32, 2, 3], |value, out| out.put_u32(value));
    assert!(matches!(
        result,
        Err(SwizzleError::InconsistentElementCount {
            declared: 2,
            actual: 3
        })
    ));
}
