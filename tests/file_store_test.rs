#![allow(missing_docs)]

use std::sync::Arc;

use swizzle::{FileStore, Handle, Persistable, Persistence, Ref, Roots, Source, SwizzleError};
use tempfile::tempdir;

#[derive(Persistable)]
struct Segment {
    next: Ref<Segment>,
    length: f64,
    name: Ref<String>,
}

fn open(path: &std::path::Path, dictionary: Option<swizzle::TypeDictionary>) -> swizzle::Result<Persistence> {
    let mut builder = Persistence::builder()
        .storage(Arc::new(FileStore::open(path)?))
        .channel_count(1);
    if let Some(dictionary) = dictionary {
        builder = builder.type_dictionary(dictionary);
    }
    builder.build()
}

/// Standard File IO
/// A ring of segments written to disk is rebuilt by a fresh instance over a reopened file.
#[test]
fn test_file_round_trip() -> swizzle::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ring.swz");

    let writer = open(&path, None)?;
    let first = Handle::new(Segment {
        next: None,
        length: 1.0,
        name: Some(Handle::new("north".to_string())),
    });
    let second = Handle::new(Segment {
        next: Some(first.clone()),
        length: 2.0,
        name: None,
    });
    first.write().next = Some(second.clone());
    let oid = writer.store(&first)?;
    let dictionary = writer.type_dictionary()?;
    drop(writer);

    let reader = open(&path, Some(dictionary))?;
    let loaded = reader.load::<Segment>(oid)?;
    let name = loaded.read().name.clone().expect("name");
    assert_eq!(name.read().as_str(), "north");
    let next = loaded.read().next.clone().expect("next");
    assert_eq!(next.read().length, 2.0);
    assert!(next.read().next.as_ref().is_some_and(|n| n.ptr_eq(&loaded)));
    Ok(())
}

/// Appended versions supersede earlier ones, for targeted and initial reads alike.
#[test]
fn test_latest_version_wins() -> swizzle::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("versions.swz");

    let writer = open(&path, None)?;
    let segment = Handle::new(Segment {
        next: None,
        length: 1.0,
        name: None,
    });
    let roots = Handle::new(Roots::new());
    roots.write().set("main", segment.clone())?;
    let roots_oid = writer.store(&roots)?;
    segment.write().length = 3.0;
    let oid = writer.store(&segment)?;
    assert_eq!(writer.store(&roots)?, roots_oid);

    let store = FileStore::open(&path)?;
    assert!(!store.is_empty()?);

    let reader = open(&path, Some(writer.type_dictionary()?))?;
    assert_eq!(reader.load::<Segment>(oid)?.read().length, 3.0);

    // The roots entity was written twice under one oid; the later copy is used.
    let initial = open(&path, Some(writer.type_dictionary()?))?;
    let root = initial.load_root::<Segment>("main")?.expect("root segment");
    assert_eq!(root.read().length, 3.0);
    Ok(())
}

/// A truncated file is reported as a format error.
#[test]
fn test_truncated_file() -> swizzle::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("broken.swz");
    std::fs::write(&path, [1u8, 2, 3])?;

    let store = FileStore::open(&path)?;
    assert!(matches!(store.read_initial(), Err(SwizzleError::Format(_))));

    let empty = FileStore::open(dir.path().join("empty.swz"))?;
    assert!(empty.is_empty()?);
    assert!(empty.read_initial()?.is_empty());
    Ok(())
}
