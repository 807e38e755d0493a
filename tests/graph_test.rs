#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use swizzle::format::{ContentWriter, EntityHeader, LIST_HEADER_LENGTH, ListHeader};
use swizzle::io::{LoadRequest, RawChunk};
use swizzle::{
    AnyRef, Handle, KeyRef, Lazy, MemoryStore, Oid, Persistable, Persistence, Ref, Roots, Source,
    SwizzleError,
};

// --- DATA STRUCTURES ---

#[derive(Persistable)]
struct Node {
    next: Ref<Node>,
    value: i64,
}

#[derive(Persistable)]
struct Leaf {
    weight: f64,
}

#[derive(Persistable)]
struct Pair {
    left: Ref<Leaf>,
    right: Ref<Leaf>,
    label: Ref<String>,
}

#[derive(Persistable, PartialEq, Eq, Hash)]
struct Tag {
    code: i32,
}

#[derive(Persistable)]
struct Book {
    title: Ref<String>,
    year: i32,
}

#[derive(Persistable)]
struct Library {
    books: Ref<Vec<Ref<Book>>>,
    tags: Ref<HashSet<KeyRef<Tag>>>,
    by_year: Ref<BTreeMap<i32, Ref<Book>>>,
}

#[derive(Persistable)]
struct Mixed {
    flag: bool,
    small: i8,
    wide: u64,
    letter: char,
    ratio: f32,
    anything: AnyRef,
    #[swizzle(transient)]
    cache: Vec<u8>,
}

#[derive(Persistable)]
struct Marker;

#[derive(Persistable)]
struct Point(i32, i32);

#[derive(Persistable)]
struct Shelf {
    label: i32,
    contents: Lazy<Leaf>,
}

#[derive(Persistable)]
enum Shape {
    Empty,
    Circle(f64),
    Labeled { name: Ref<String>, sides: u8 },
}

/// Serves one fixed chunk for every request.
struct FixedSource {
    chunk: Vec<u8>,
}

impl Source for FixedSource {
    fn read_initial(&self) -> swizzle::Result<Vec<RawChunk>> {
        Ok(Vec::new())
    }

    fn read_by_object_ids(&self, _: &LoadRequest) -> swizzle::Result<Vec<RawChunk>> {
        Ok(vec![RawChunk::from(self.chunk.as_slice())])
    }
}

/// A second instance over the same data, sharing only the written type dictionary.
fn reader(writer: &Persistence, store: &Arc<MemoryStore>) -> swizzle::Result<Persistence> {
    Persistence::builder()
        .storage(store.clone())
        .type_dictionary(writer.type_dictionary()?)
        .build()
}

fn raw_entity(tid: swizzle::Tid, oid: Oid, content: &[u8]) -> Vec<u8> {
    let mut bytes = EntityHeader::new(tid, oid, content.len()).to_bytes().to_vec();
    bytes.extend_from_slice(content);
    bytes
}

fn list_header(byte_length: u64, element_count: u64) -> Vec<u8> {
    let mut content = byte_length.to_le_bytes().to_vec();
    content.extend_from_slice(&element_count.to_le_bytes());
    content
}

fn int_list(values: &[i32]) -> swizzle::Result<Vec<u8>> {
    let mut content = vec![0u8; LIST_HEADER_LENGTH + values.len() * 4];
    let mut out = ContentWriter::new(&mut content);
    out.put_list_header(ListHeader::new(values.len() * 4, values.len()))?;
    for v in values {
        out.put_u32(*v as u32)?;
    }
    out.finish()?;
    Ok(content)
}

// --- TESTS ---

/// A two-node cycle comes back as a cycle of exactly two instances.
#[test]
fn test_cycle_round_trip() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let a = Handle::new(Node { next: None, value: 1 });
    let b = Handle::new(Node {
        next: Some(a.clone()),
        value: 2,
    });
    a.write().next = Some(b.clone());
    let oid = persistence.store(&a)?;
    assert_eq!(store.entity_count()?, 2);

    let loaded = reader(&persistence, &store)?.load::<Node>(oid)?;
    let second = loaded.read().next.clone().expect("a points to b");
    assert_eq!(second.read().value, 2);
    let back = second.read().next.clone().expect("b points back to a");
    assert!(back.ptr_eq(&loaded));
    assert_eq!(back.read().value, 1);
    Ok(())
}

/// Shared references are stored once and loaded as one instance.
#[test]
fn test_shared_reference_stays_shared() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let leaf = Handle::new(Leaf { weight: 0.5 });
    let pair = Handle::new(Pair {
        left: Some(leaf.clone()),
        right: Some(leaf.clone()),
        label: None,
    });
    let oid = persistence.store(&pair)?;
    assert_eq!(store.entity_count()?, 2);

    let loaded = reader(&persistence, &store)?.load::<Pair>(oid)?;
    let guard = loaded.read();
    let left = guard.left.as_ref().expect("left");
    let right = guard.right.as_ref().expect("right");
    assert!(left.ptr_eq(right));
    assert_eq!(left.read().weight, 0.5);
    assert!(guard.label.is_none());
    Ok(())
}

/// Loading an oid the registry already knows returns the live instance untouched.
#[test]
fn test_load_of_live_instance_does_not_overwrite() -> swizzle::Result<()> {
    let (persistence, _store) = Persistence::in_memory()?;

    let node = Handle::new(Node {
        next: None,
        value: 10,
    });
    let oid = persistence.store(&node)?;
    node.write().value = 99;

    let loaded = persistence.load::<Node>(oid)?;
    assert!(loaded.ptr_eq(&node));
    assert_eq!(loaded.read().value, 99);
    Ok(())
}

/// Storing a known root again rewrites its entity under the same oid.
#[test]
fn test_restore_updates_entity() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let node = Handle::new(Node { next: None, value: 1 });
    let first = persistence.store(&node)?;
    node.write().value = 2;
    let second = persistence.store(&node)?;
    assert_eq!(first, second);
    assert_eq!(store.entity_count()?, 1);
    assert_eq!(store.commit_count()?, 2);

    let loaded = reader(&persistence, &store)?.load::<Node>(first)?;
    assert_eq!(loaded.read().value, 2);
    Ok(())
}

/// Vectors, hash sets keyed by referenced values and ordered maps survive a round trip.
#[test]
fn test_collections_round_trip() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let dune = Handle::new(Book {
        title: Some(Handle::new("Dune".to_string())),
        year: 1965,
    });
    let solaris = Handle::new(Book {
        title: Some(Handle::new("Solaris".to_string())),
        year: 1961,
    });
    let tags: HashSet<KeyRef<Tag>> = [1, 2, 3]
        .into_iter()
        .map(|code| KeyRef::new(Handle::new(Tag { code })))
        .collect();
    let by_year: BTreeMap<i32, Ref<Book>> = [(1965, Some(dune.clone())), (1961, Some(solaris.clone()))]
        .into_iter()
        .collect();
    let library = Handle::new(Library {
        books: Some(Handle::new(vec![Some(dune.clone()), Some(solaris.clone()), None])),
        tags: Some(Handle::new(tags)),
        by_year: Some(Handle::new(by_year)),
    });
    let oid = persistence.store(&library)?;

    // Registering the root type registers every collection and element type it names.
    let reader = reader(&persistence, &store)?;
    let loaded = reader.load::<Library>(oid)?;

    let guard = loaded.read();
    let books = guard.books.as_ref().expect("books").read().clone();
    assert_eq!(books.len(), 3);
    assert!(books[2].is_none());
    let first = books[0].clone().expect("first book");
    let title = first.read().title.clone().expect("title");
    assert_eq!(title.read().as_str(), "Dune");

    let codes: BTreeSet<i32> = guard
        .tags
        .as_ref()
        .expect("tags")
        .read()
        .iter()
        .map(|tag| tag.handle().read().code)
        .collect();
    assert_eq!(codes, BTreeSet::from([1, 2, 3]));
    assert!(
        guard
            .tags
            .as_ref()
            .expect("tags")
            .read()
            .contains(&KeyRef::new(Handle::new(Tag { code: 2 })))
    );

    let map = guard.by_year.as_ref().expect("map").read();
    let years: Vec<i32> = map.keys().copied().collect();
    assert_eq!(years, vec![1961, 1965]);
    let from_map = map[&1965].clone().expect("1965");
    assert!(from_map.ptr_eq(&first));
    Ok(())
}

/// Built-in value types load as roots of their own.
#[test]
fn test_native_roots() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let text = persistence.store(&Handle::new("grüße".to_string()))?;
    let number = persistence.store(&Handle::new(-42i64))?;
    let pause = persistence.store(&Handle::new(Duration::new(3, 500)))?;
    let before_epoch = UNIX_EPOCH - Duration::new(10, 250_000_000);
    let moment = persistence.store(&Handle::new(before_epoch))?;
    let bytes = persistence.store(&Handle::new(vec![1u8, 2, 3]))?;
    let unit = persistence.store(&Handle::new(()))?;

    let reader = reader(&persistence, &store)?;
    assert_eq!(*reader.load::<String>(text)?.read(), "grüße");
    assert_eq!(*reader.load::<i64>(number)?.read(), -42);
    assert_eq!(*reader.load::<Duration>(pause)?.read(), Duration::new(3, 500));
    assert_eq!(*reader.load::<SystemTime>(moment)?.read(), before_epoch);
    assert_eq!(*reader.load::<Vec<u8>>(bytes)?.read(), vec![1, 2, 3]);
    reader.load::<()>(unit)?;
    Ok(())
}

/// Every primitive field kind, type-erased references and transient fields.
#[test]
fn test_mixed_fields() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let target = Handle::new(Leaf { weight: 7.25 });
    let mixed = Handle::new(Mixed {
        flag: true,
        small: -5,
        wide: u64::MAX,
        letter: 'ß',
        ratio: 1.5,
        anything: Some(target.to_instance()),
        cache: vec![9; 16],
    });
    let oid = persistence.store(&mixed)?;

    let reader = reader(&persistence, &store)?;
    reader.register::<Leaf>()?;
    let loaded = reader.load::<Mixed>(oid)?;
    let guard = loaded.read();
    assert!(guard.flag);
    assert_eq!(guard.small, -5);
    assert_eq!(guard.wide, u64::MAX);
    assert_eq!(guard.letter, 'ß');
    assert_eq!(guard.ratio, 1.5);
    assert!(guard.cache.is_empty());
    let leaf = guard
        .anything
        .as_ref()
        .and_then(|i| i.downcast::<Leaf>())
        .expect("leaf behind AnyRef");
    assert_eq!(leaf.read().weight, 7.25);
    Ok(())
}

/// Unit and tuple structs derive like named ones.
#[test]
fn test_unit_and_tuple_structs() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let marker = persistence.store(&Handle::new(Marker))?;
    let point = persistence.store(&Handle::new(Point(3, -4)))?;

    let reader = reader(&persistence, &store)?;
    reader.load::<Marker>(marker)?;
    let loaded = reader.load::<Point>(point)?;
    assert_eq!(loaded.read().0, 3);
    assert_eq!(loaded.read().1, -4);
    Ok(())
}

/// Fixed arrays keep their elements; a shorter persisted list leaves blank slots.
#[test]
fn test_fixed_arrays() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let oid = persistence.store(&Handle::new([1i32, 2, 3, 4]))?;
    let loaded = reader(&persistence, &store)?.load::<[i32; 4]>(oid)?;
    assert_eq!(*loaded.read(), [1, 2, 3, 4]);

    let tid = persistence.register::<[i32; 2]>()?;
    let short = Oid::new(5_000);
    store.insert_raw(&raw_entity(tid, short, &int_list(&[7])?))?;
    let loaded = persistence.load::<[i32; 2]>(short)?;
    assert_eq!(*loaded.read(), [7, 0]);
    Ok(())
}

/// More persisted elements than the array can hold fail the load.
#[test]
fn test_array_length_mismatch() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let tid = persistence.register::<[i32; 2]>()?;
    let oid = Oid::new(5_001);
    store.insert_raw(&raw_entity(tid, oid, &int_list(&[1, 2, 3])?))?;

    let result = persistence.load::<[i32; 2]>(oid);
    assert!(matches!(
        result,
        Err(SwizzleError::ArrayLengthMismatch {
            capacity: 2,
            persisted: 3,
            ..
        })
    ));
    assert!(persistence.objects().lookup_object(oid)?.is_none());
    Ok(())
}

/// An oid the source does not have is reported, not silently nulled.
#[test]
fn test_missing_object() -> swizzle::Result<()> {
    let (persistence, _store) = Persistence::in_memory()?;

    let result = persistence.load::<Node>(Oid::new(42));
    assert!(matches!(result, Err(SwizzleError::MissingObject(oid)) if oid == Oid::new(42)));
    Ok(())
}

/// Loading an oid as a different type than it was stored as fails.
#[test]
fn test_type_mismatch_on_load() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let oid = persistence.store(&Handle::new(Leaf { weight: 1.0 }))?;
    let reader = reader(&persistence, &store)?;
    reader.register::<Leaf>()?;

    let result = reader.load::<Node>(oid);
    assert!(matches!(result, Err(SwizzleError::TypeMismatch { .. })));
    Ok(())
}

/// The initial load starts from the latest stored roots and resolves them by name.
#[test]
fn test_load_initial_resolves_named_roots() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let tail = Handle::new(Node { next: None, value: 2 });
    let head = Handle::new(Node {
        next: Some(tail.clone()),
        value: 1,
    });
    let mut roots = Roots::new();
    roots.set("head", head)?;
    persistence.store(&Handle::new(roots))?;
    let stray = persistence.store(&Handle::new(Leaf { weight: 1.0 }))?;

    let reader = reader(&persistence, &store)?;
    let loaded = reader.load_root::<Node>("head")?.expect("head");
    assert_eq!(loaded.read().value, 1);
    let next = loaded.read().next.clone().expect("tail");
    assert_eq!(next.read().value, 2);
    assert!(reader.load_root::<Node>("tail")?.is_none());
    // Only the graph of the roots is loaded.
    assert!(reader.objects().lookup_object(stray)?.is_none());
    assert!(matches!(
        reader.load_root::<Leaf>("head"),
        Err(SwizzleError::TypeMismatch { .. })
    ));

    // Newer roots win.
    let mut newer = Roots::new();
    newer.set("head", tail)?;
    newer.set("spare", Handle::new(Leaf { weight: 4.0 }))?;
    persistence.store(&Handle::new(newer))?;

    let reader = crate::reader(&persistence, &store)?;
    reader.register::<Leaf>()?;
    let roots = reader.load_initial()?.expect("roots");
    assert_eq!(roots.read().names().collect::<Vec<_>>(), ["head", "spare"]);
    let head = roots.read().get_as::<Node>("head")?.expect("head");
    assert_eq!(head.read().value, 2);
    assert!(head.read().next.is_none());

    let empty = Persistence::in_memory()?.0;
    assert!(empty.load_initial()?.is_none());
    Ok(())
}

/// Root names are zero-terminated on disk and cannot contain a zero byte.
#[test]
fn test_root_name_with_zero_byte() {
    let mut roots = Roots::new();
    let result = roots.set("a\0b", Handle::new(Leaf { weight: 0.0 }));
    assert!(matches!(result, Err(SwizzleError::Configuration(_))));
    assert!(roots.is_empty());
}

/// Several roots in one call share the instances they have in common.
#[test]
fn test_collect_multiple_roots() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let shared = Handle::new(Leaf { weight: 2.0 });
    let first = persistence.store(&Handle::new(Pair {
        left: Some(shared.clone()),
        right: None,
        label: None,
    }))?;
    let second = persistence.store(&Handle::new(Pair {
        left: None,
        right: Some(shared),
        label: None,
    }))?;

    let reader = reader(&persistence, &store)?;
    reader.register::<Pair>()?;
    reader.register::<Leaf>()?;
    let roots = reader.loader().collect(&[first, Oid::NULL, second])?;
    assert_eq!(roots.len(), 3);
    assert!(roots[1].is_none());

    let a = roots[0].as_ref().and_then(|i| i.downcast::<Pair>()).expect("first");
    let b = roots[2].as_ref().and_then(|i| i.downcast::<Pair>()).expect("second");
    let left = a.read().left.clone().expect("left");
    let right = b.read().right.clone().expect("right");
    assert!(left.ptr_eq(&right));
    Ok(())
}

/// Registering only the root type is enough to load a graph of other derived types.
#[test]
fn test_root_type_registration_is_transitive() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let oid = persistence.store(&Handle::new(Pair {
        left: Some(Handle::new(Leaf { weight: 1.25 })),
        right: None,
        label: Some(Handle::new("left only".to_string())),
    }))?;

    let reader = reader(&persistence, &store)?;
    assert!(reader.types().tid_of::<Leaf>()?.is_none());
    let loaded = reader.load::<Pair>(oid)?;
    assert!(reader.types().tid_of::<Leaf>()?.is_some());

    let guard = loaded.read();
    assert_eq!(guard.left.as_ref().expect("left").read().weight, 1.25);
    assert_eq!(guard.label.as_ref().expect("label").read().as_str(), "left only");
    Ok(())
}

/// Null references are written as oid 0 and load as `None`.
#[test]
fn test_null_reference_loads_as_none() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let oid = persistence.store(&Handle::new(Pair {
        left: None,
        right: None,
        label: None,
    }))?;
    assert_eq!(store.entity_count()?, 1);
    let bytes = store.entity(oid)?.expect("pair entity");
    assert!(bytes[swizzle::format::ENTITY_HEADER_LENGTH..].iter().all(|b| *b == 0));

    let loaded = reader(&persistence, &store)?.load::<Pair>(oid)?;
    let guard = loaded.read();
    assert!(guard.left.is_none());
    assert!(guard.right.is_none());
    assert!(guard.label.is_none());
    Ok(())
}

/// A list or string whose element count does not fit its block fails the load.
#[test]
fn test_corrupt_element_count() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;
    let list_tid = persistence.register::<Vec<i32>>()?;
    let string_tid = persistence.register::<String>()?;

    let empty_block = list_header(LIST_HEADER_LENGTH as u64, u64::MAX);
    let mut short_block = list_header(LIST_HEADER_LENGTH as u64 + 8, 3);
    short_block.extend_from_slice(&[0; 8]);

    let cases = [
        (list_tid, Oid::new(6_000), &empty_block),
        (list_tid, Oid::new(6_001), &short_block),
        (string_tid, Oid::new(6_002), &empty_block),
        (string_tid, Oid::new(6_003), &short_block),
    ];
    for (tid, oid, content) in cases {
        store.insert_raw(&raw_entity(tid, oid, content))?;
    }

    for oid in [Oid::new(6_000), Oid::new(6_001)] {
        let result = persistence.load::<Vec<i32>>(oid);
        assert!(matches!(result, Err(SwizzleError::Format(_))), "{oid}: {result:?}");
    }
    for oid in [Oid::new(6_002), Oid::new(6_003)] {
        let result = persistence.load::<String>(oid);
        assert!(matches!(result, Err(SwizzleError::Format(_))), "{oid}: {result:?}");
    }
    assert!(persistence.objects().lookup_object(Oid::new(6_000))?.is_none());
    Ok(())
}

/// An entity cut short by its source is rejected and leaves nothing registered.
#[test]
fn test_truncated_entity() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;
    let oid = persistence.store(&Handle::new(Leaf { weight: 2.5 }))?;

    let mut chunk = store.entity(oid)?.expect("leaf entity");
    chunk.truncate(chunk.len() - 3);
    let reader = Persistence::builder()
        .source(Arc::new(FixedSource { chunk }))
        .target(store.clone())
        .type_dictionary(persistence.type_dictionary()?)
        .build()?;

    let result = reader.load::<Leaf>(oid);
    assert!(matches!(result, Err(SwizzleError::Format(_))));
    assert!(reader.objects().lookup_object(oid)?.is_none());
    Ok(())
}

/// A lazy field is written as an oid and only loaded on first access.
#[test]
fn test_lazy_reference() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let leaf = Handle::new(Leaf { weight: 8.5 });
    let shelf = Handle::new(Shelf {
        label: 3,
        contents: Lazy::new(leaf.clone()),
    });
    assert!(shelf.read().contents.object_id().is_null());
    let oid = persistence.store(&shelf)?;
    let leaf_oid = shelf.read().contents.object_id();
    assert!(!leaf_oid.is_null());
    assert_eq!(store.entity_count()?, 2);

    let reader = reader(&persistence, &store)?;
    let loaded = reader.load::<Shelf>(oid)?;
    let guard = loaded.read();
    assert_eq!(guard.label, 3);
    assert_eq!(guard.contents.object_id(), leaf_oid);
    assert!(!guard.contents.is_loaded());
    assert!(reader.objects().lookup_object(leaf_oid)?.is_none());

    let first = guard.contents.get()?.expect("leaf");
    assert_eq!(first.read().weight, 8.5);
    let again = guard.contents.get()?.expect("leaf");
    assert!(first.ptr_eq(&again));
    assert!(reader.objects().lookup_object(leaf_oid)?.is_some());

    // A cleared target comes back as the instance the registry still holds.
    assert!(guard.contents.clear().is_some());
    assert!(guard.contents.peek().is_none());
    let reloaded = guard.contents.get()?.expect("leaf");
    assert!(reloaded.ptr_eq(&first));

    let empty = Lazy::<Leaf>::empty();
    assert!(empty.is_loaded());
    assert!(empty.get()?.is_none());
    assert!(empty.clear().is_none());
    Ok(())
}

/// Unit, tuple and struct variants round-trip, references included.
#[test]
fn test_enum_round_trip() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    let empty = persistence.store(&Handle::new(Shape::Empty))?;
    let circle = persistence.store(&Handle::new(Shape::Circle(2.5)))?;
    let labeled = persistence.store(&Handle::new(Shape::Labeled {
        name: Some(Handle::new("triangle".to_string())),
        sides: 3,
    }))?;
    assert_eq!(store.entity_count()?, 4);

    let reader = reader(&persistence, &store)?;
    assert!(matches!(*reader.load::<Shape>(empty)?.read(), Shape::Empty));
    let loaded = reader.load::<Shape>(circle)?;
    assert!(matches!(*loaded.read(), Shape::Circle(radius) if radius == 2.5));

    let loaded = reader.load::<Shape>(labeled)?;
    let guard = loaded.read();
    let Shape::Labeled { name, sides } = &*guard else {
        panic!("expected the labeled variant");
    };
    assert_eq!(*sides, 3);
    assert_eq!(name.as_ref().expect("name").read().as_str(), "triangle");
    Ok(())
}
