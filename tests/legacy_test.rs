#![allow(missing_docs)]

use std::sync::Arc;

use swizzle::format::{ContentWriter, EntityHeader};
use swizzle::layout::{MemberDescriptor, MemberKind, PrimitiveKind, TypeDescription};
use swizzle::legacy::{LegacyTypeMapper, ValueTranslator};
use swizzle::{
    Handle, MemoryStore, Oid, Persistable, Persistence, Ref, RefactoringMapping, SwizzleError,
    Tid, TypeDictionary,
};

fn primitive(name: &str, kind: PrimitiveKind) -> MemberDescriptor {
    MemberDescriptor::new(name, kind.name(), MemberKind::Primitive(kind))
}

fn reference(name: &str) -> MemberDescriptor {
    MemberDescriptor::new(name, "reference", MemberKind::Reference)
}

fn raw_entity(tid: Tid, oid: Oid, content: &[u8]) -> Vec<u8> {
    let mut bytes = EntityHeader::new(tid, oid, content.len()).to_bytes().to_vec();
    bytes.extend_from_slice(content);
    bytes
}

const LEGACY: Tid = Tid::new(2_000_000);
const CURRENT: Tid = Tid::new(2_000_001);

// --- MAPPER ---

/// A byte widened to a long keeps its value.
#[test]
fn test_widening_conversion() -> swizzle::Result<()> {
    let legacy = TypeDescription::new("Counter", vec![primitive("count", PrimitiveKind::Byte)]);
    let current = TypeDescription::new("Counter", vec![primitive("count", PrimitiveKind::Long)]);

    let mapping = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current)?;
    assert_eq!(mapping.target_length(), 8);
    assert_eq!(mapping.translate(&[7])?, 7i64.to_le_bytes().to_vec());
    assert_eq!(mapping.translate(&[0xFF])?, (-1i64).to_le_bytes().to_vec());
    Ok(())
}

/// Booleans become 1 or 0, non-zero numbers become true.
#[test]
fn test_boolean_conversions() -> swizzle::Result<()> {
    let legacy = TypeDescription::new(
        "Flags",
        vec![
            primitive("enabled", PrimitiveKind::Boolean),
            primitive("level", PrimitiveKind::Int),
        ],
    );
    let current = TypeDescription::new(
        "Flags",
        vec![
            primitive("enabled", PrimitiveKind::Int),
            primitive("level", PrimitiveKind::Boolean),
        ],
    );

    let mapping = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current)?;
    let mut content = vec![1u8];
    content.extend_from_slice(&5i32.to_le_bytes());
    let mut expected = 1i32.to_le_bytes().to_vec();
    expected.push(1);
    assert_eq!(mapping.translate(&content)?, expected);
    Ok(())
}

/// Dropped members are skipped, reordered ones land at their new offset, new ones stay zero.
#[test]
fn test_reorder_drop_and_add() -> swizzle::Result<()> {
    let legacy = TypeDescription::new(
        "Item",
        vec![
            reference("owner"),
            primitive("gone", PrimitiveKind::Long),
            primitive("count", PrimitiveKind::Short),
        ],
    );
    let current = TypeDescription::new(
        "Item",
        vec![
            primitive("count", PrimitiveKind::Int),
            reference("owner"),
            primitive("added", PrimitiveKind::Double),
        ],
    );

    let mapping = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current)?;
    assert_eq!(
        mapping.translators(),
        &[
            ValueTranslator::Reference { target_offset: 4 },
            ValueTranslator::Skip { width: 8 },
            ValueTranslator::Primitive {
                from: PrimitiveKind::Short,
                to: PrimitiveKind::Int,
                target_offset: 0,
            },
        ]
    );

    let mut content = 99u64.to_le_bytes().to_vec();
    content.extend_from_slice(&123u64.to_le_bytes());
    content.extend_from_slice(&(-3i16).to_le_bytes());
    let translated = mapping.translate(&content)?;
    assert_eq!(translated.len(), 20);
    assert_eq!(&translated[0..4], &(-3i32).to_le_bytes());
    assert_eq!(&translated[4..12], &99u64.to_le_bytes());
    assert_eq!(&translated[12..20], &[0u8; 8]);
    Ok(())
}

/// Member renames are applied before matching.
#[test]
fn test_member_rename() -> swizzle::Result<()> {
    let legacy = TypeDescription::new("Point", vec![primitive("xpos", PrimitiveKind::Int)]);
    let current = TypeDescription::new("Point", vec![primitive("x", PrimitiveKind::Int)]);

    let renamed = LegacyTypeMapper::new(RefactoringMapping::new().rename_member("Point", "xpos", "x"));
    let mapping = renamed.build(LEGACY, &legacy, CURRENT, &current)?;
    assert_eq!(mapping.translate(&42i32.to_le_bytes())?, 42i32.to_le_bytes().to_vec());

    let plain = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current)?;
    assert_eq!(plain.translators(), &[ValueTranslator::Skip { width: 4 }]);
    Ok(())
}

/// A primitive that became a reference cannot be mapped.
#[test]
fn test_incompatible_field_kind() {
    let legacy = TypeDescription::new("Order", vec![primitive("customer", PrimitiveKind::Long)]);
    let current = TypeDescription::new("Order", vec![reference("customer")]);

    let result = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current);
    match result {
        Err(SwizzleError::IncompatibleFieldKind {
            member,
            legacy,
            current,
            ..
        }) => {
            assert_eq!(member, "customer");
            assert_eq!(legacy, "long");
            assert_eq!(current, "reference");
        }
        other => panic!("expected IncompatibleFieldKind, got {other:?}"),
    }
}

/// Variable-length layouts are not mapped automatically.
#[test]
fn test_variable_length_is_unsupported() {
    let bytes = MemberDescriptor::new("bytes", "[u8]", MemberKind::ScalarList(PrimitiveKind::Byte));
    let legacy = TypeDescription::new("Blob", vec![primitive("size", PrimitiveKind::Int)]);
    let current = TypeDescription::new("Blob", vec![bytes]);

    let result = LegacyTypeMapper::default().build(LEGACY, &legacy, CURRENT, &current);
    assert!(matches!(
        result,
        Err(SwizzleError::UnsupportedSchemaEvolution { .. })
    ));
}

// --- END TO END ---

#[derive(Persistable)]
#[swizzle(type_name = "demo.Account")]
struct Account {
    owner: Ref<String>,
    balance: i64,
    active: i32,
}

/// An entity written under an older layout loads into the current type.
#[test]
fn test_legacy_entity_loads_into_current_type() -> swizzle::Result<()> {
    let mut dictionary = TypeDictionary::new();
    dictionary.insert(
        LEGACY,
        TypeDescription::new(
            "demo.Account",
            vec![
                reference("owner"),
                primitive("balance", PrimitiveKind::Int),
                primitive("active", PrimitiveKind::Boolean),
                primitive("note", PrimitiveKind::Short),
            ],
        ),
    )?;
    let store = Arc::new(MemoryStore::new());
    let persistence = Persistence::builder()
        .storage(store.clone())
        .type_dictionary(dictionary)
        .build()?;
    let current = persistence.register::<Account>()?;
    assert_ne!(current, LEGACY);

    let owner = Handle::new("alice".to_string());
    let owner_oid = persistence.store(&owner)?;

    let mut content = vec![0u8; 15];
    let mut out = ContentWriter::new(&mut content);
    out.put_oid(owner_oid)?;
    out.put_u32(1234)?;
    out.put_u8(1)?;
    out.put_u16(9)?;
    out.finish()?;
    let oid = Oid::new(7_000);
    store.insert_raw(&raw_entity(LEGACY, oid, &content))?;

    let account = persistence.load::<Account>(oid)?;
    let guard = account.read();
    assert_eq!(guard.balance, 1234);
    assert_eq!(guard.active, 1);
    assert!(guard.owner.as_ref().is_some_and(|o| o.ptr_eq(&owner)));
    Ok(())
}

#[derive(Persistable)]
#[swizzle(type_name = "demo.Celsius")]
struct Celsius {
    degrees: f64,
}

/// Type renames map a legacy name onto the current type.
#[test]
fn test_renamed_type() -> swizzle::Result<()> {
    let mut dictionary = TypeDictionary::new();
    dictionary.insert(
        LEGACY,
        TypeDescription::new("demo.Temperature", vec![primitive("degrees", PrimitiveKind::Float)]),
    )?;
    let store = Arc::new(MemoryStore::new());
    let persistence = Persistence::builder()
        .storage(store.clone())
        .type_dictionary(dictionary)
        .refactorings(RefactoringMapping::new().rename_type("demo.Temperature", "demo.Celsius"))
        .build()?;
    persistence.register::<Celsius>()?;

    let oid = Oid::new(7_001);
    store.insert_raw(&raw_entity(LEGACY, oid, &21.5f32.to_le_bytes()))?;
    let loaded = persistence.load::<Celsius>(oid)?;
    assert_eq!(loaded.read().degrees, 21.5);
    Ok(())
}

/// Without a current type of the same name, a legacy tid has no handler.
#[test]
fn test_unknown_legacy_type() -> swizzle::Result<()> {
    let mut dictionary = TypeDictionary::new();
    dictionary.insert(
        LEGACY,
        TypeDescription::new("demo.Vanished", vec![primitive("value", PrimitiveKind::Int)]),
    )?;
    let store = Arc::new(MemoryStore::new());
    let persistence = Persistence::builder()
        .storage(store.clone())
        .type_dictionary(dictionary)
        .build()?;

    let oid = Oid::new(7_002);
    store.insert_raw(&raw_entity(LEGACY, oid, &5i32.to_le_bytes()))?;
    let result = persistence.load::<Celsius>(oid);
    assert!(matches!(result, Err(SwizzleError::TypeNotHandled(tid)) if tid == LEGACY));

    let unknown = Tid::new(9_999_999);
    assert!(matches!(
        persistence.types().handler_for_tid(unknown),
        Err(SwizzleError::TypeNotHandled(_))
    ));
    Ok(())
}

/// Dictionary snapshots survive encoding.
#[test]
fn test_dictionary_snapshot() -> swizzle::Result<()> {
    let (persistence, _store) = Persistence::in_memory()?;
    persistence.register::<Account>()?;

    let dictionary = persistence.type_dictionary()?;
    let decoded = TypeDictionary::from_bytes(&dictionary.to_bytes()?)?;
    assert_eq!(decoded, dictionary);
    assert_eq!(decoded.tids_for_name("demo.Account").count(), 1);
    Ok(())
}
