#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use swizzle::{Handle, MemoryStore, ObjectRegistry, Oid, Persistable, Persistence, Ref};

#[derive(Persistable)]
struct Leaf {
    weight: f64,
}

#[derive(Persistable)]
struct Pair {
    left: Ref<Leaf>,
    right: Ref<Leaf>,
}

#[derive(Persistable)]
struct Node {
    next: Ref<Node>,
    value: i64,
}

/// Storers on separate threads converge on one oid for a shared instance.
#[test]
fn test_parallel_storers_share_identity() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;
    let shared = Handle::new(Leaf { weight: 1.0 });

    let oids = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let persistence = persistence.clone();
                let shared = shared.clone();
                scope.spawn(move || {
                    let pair = Handle::new(Pair {
                        left: Some(shared),
                        right: Some(Handle::new(Leaf { weight: i as f64 })),
                    });
                    persistence.store(&pair)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("storer thread"))
            .collect::<swizzle::Result<Vec<_>>>()
    })?;

    assert_eq!(oids.len(), 8);
    let shared_oid = persistence
        .objects()
        .lookup_object_id(&shared.to_instance())?
        .expect("shared leaf registered");
    assert!(store.contains(shared_oid)?);
    // 8 pairs, 8 private leaves, 1 shared leaf.
    assert_eq!(store.entity_count()?, 17);
    Ok(())
}

/// Two storers racing to store the same new instance as their root agree on one oid.
#[test]
fn test_racing_root_stores_agree() -> swizzle::Result<()> {
    let (persistence, store) = Persistence::in_memory()?;

    for round in 0..16 {
        let node = Handle::new(Node {
            next: None,
            value: round,
        });
        let barrier = Barrier::new(2);
        let oids = thread::scope(|scope| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let persistence = persistence.clone();
                    let node = node.clone();
                    let barrier = &barrier;
                    scope.spawn(move || -> swizzle::Result<Oid> {
                        let mut storer = persistence.storer();
                        barrier.wait();
                        let oid = storer.store(&node)?;
                        storer.commit()?;
                        Ok(oid)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().expect("storer thread"))
                .collect::<swizzle::Result<Vec<_>>>()
        })?;

        assert_eq!(oids[0], oids[1], "round {round}");
        assert_eq!(
            persistence.objects().lookup_object_id(&node.to_instance())?,
            Some(oids[0])
        );
    }
    assert_eq!(store.entity_count()?, 16);
    Ok(())
}

/// Loaders racing for the same graph all end up with the same instances.
#[test]
fn test_parallel_loaders_converge() -> swizzle::Result<()> {
    let (writer, store) = Persistence::in_memory()?;
    let a = Handle::new(Node { next: None, value: 1 });
    let b = Handle::new(Node {
        next: Some(a.clone()),
        value: 2,
    });
    a.write().next = Some(b);
    let oid = writer.store(&a)?;

    let reader = Persistence::builder()
        .storage(store.clone())
        .type_dictionary(writer.type_dictionary()?)
        .build()?;
    reader.register::<Node>()?;

    let roots = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let reader = reader.clone();
                scope.spawn(move || reader.load::<Node>(oid))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("loader thread"))
            .collect::<swizzle::Result<Vec<_>>>()
    })?;

    let first = &roots[0];
    assert!(roots.iter().all(|root| root.ptr_eq(first)));
    let next = first.read().next.clone().expect("next");
    assert_eq!(next.read().value, 2);
    assert!(next.read().next.as_ref().is_some_and(|n| n.ptr_eq(first)));
    assert_eq!(reader.objects().len()?, 2);
    Ok(())
}

/// Two persistence instances can share one identity registry.
#[test]
fn test_shared_object_registry() -> swizzle::Result<()> {
    let objects = Arc::new(ObjectRegistry::new(1_000));
    let left = Persistence::builder()
        .storage(Arc::new(MemoryStore::new()))
        .object_registry(objects.clone())
        .build()?;
    let right = Persistence::builder()
        .storage(Arc::new(MemoryStore::new()))
        .object_registry(objects.clone())
        .build()?;

    let leaf = Handle::new(Leaf { weight: 9.0 });
    let first = left.store(&leaf)?;
    let second = right.store(&leaf)?;
    assert_eq!(first, second);
    assert_eq!(first.as_u64(), 1_000);
    assert_eq!(objects.len()?, 1);
    Ok(())
}
