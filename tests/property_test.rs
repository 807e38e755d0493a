#![allow(missing_docs)]

use proptest::prelude::*;
use swizzle::chunk::ChunkBuffer;
use swizzle::layout::{PrimitiveKind, PrimitiveValue};
use swizzle::{Handle, Oid, Persistable, Persistence, Ref};

#[derive(Persistable)]
struct Vertex {
    edge: Ref<Vertex>,
    label: i32,
}

/// Builds vertices `0..n` where vertex `i` points to `links[i]`, if any.
fn build_graph(links: &[Option<usize>]) -> Vec<Handle<Vertex>> {
    let vertices: Vec<Handle<Vertex>> = (0..links.len())
        .map(|i| {
            Handle::new(Vertex {
                edge: None,
                label: i as i32,
            })
        })
        .collect();
    for (vertex, link) in vertices.iter().zip(links) {
        vertex.write().edge = link.map(|target| vertices[target].clone());
    }
    vertices
}

fn arb_links() -> impl Strategy<Value = Vec<Option<usize>>> {
    (1usize..24).prop_flat_map(|n| prop::collection::vec(prop::option::of(0..n), n))
}

proptest! {
    #[test]
    fn prop_chunk_buffer_keeps_entities_whole(
        increment in 24usize..256,
        lengths in prop::collection::vec(1usize..512, 0..64),
    ) {
        let mut buffer = ChunkBuffer::new(increment);
        for (i, len) in lengths.iter().enumerate() {
            let region = buffer.allocate(*len);
            prop_assert_eq!(region.len(), *len);
            prop_assert!(region.iter().all(|b| *b == 0));
            region.fill(i as u8);
        }
        prop_assert_eq!(buffer.byte_len(), lengths.iter().sum::<usize>());
        prop_assert!(buffer.regions().all(|r| !r.is_empty()));
        prop_assert_eq!(buffer.is_empty(), lengths.is_empty());

        // No allocation straddles two regions.
        let mut remaining = lengths.iter().copied().enumerate().peekable();
        for region in buffer.regions() {
            let mut offset = 0;
            while offset < region.len() {
                let (i, len) = remaining.next().expect("region holds a known allocation");
                prop_assert!(region[offset..offset + len].iter().all(|b| *b == i as u8));
                offset += len;
            }
        }
        prop_assert!(remaining.peek().is_none());

        let first = buffer.first_capacity();
        buffer.clear();
        prop_assert!(buffer.is_empty());
        prop_assert_eq!(buffer.region_count(), 1);
        prop_assert_eq!(buffer.first_capacity(), first);
    }

    #[test]
    fn prop_integer_conversions_cast(value in any::<i64>()) {
        let long = PrimitiveValue::Long(value);
        prop_assert_eq!(long.convert(PrimitiveKind::Int), PrimitiveValue::Int(value as i32));
        prop_assert_eq!(long.convert(PrimitiveKind::Short), PrimitiveValue::Short(value as i16));
        prop_assert_eq!(long.convert(PrimitiveKind::Boolean), PrimitiveValue::Boolean(value != 0));

        let byte = PrimitiveValue::Byte(value as i8);
        prop_assert_eq!(byte.convert(PrimitiveKind::Long), PrimitiveValue::Long(i64::from(value as i8)));
    }

    #[test]
    fn prop_random_graph_round_trip(links in arb_links()) {
        let (writer, store) = Persistence::in_memory()?;
        let vertices = build_graph(&links);
        let mut storer = writer.storer();
        let roots: Vec<_> = vertices.iter().map(Handle::to_instance).collect();
        let oids: Vec<Oid> = storer.store_all(&roots)?;
        storer.commit()?;
        prop_assert_eq!(store.entity_count()?, links.len());

        let reader = Persistence::builder()
            .storage(store.clone())
            .type_dictionary(writer.type_dictionary()?)
            .build()?;
        reader.register::<Vertex>()?;
        let loaded: Vec<Handle<Vertex>> = reader
            .loader()
            .collect(&oids)?
            .into_iter()
            .map(|i| i.and_then(|i| i.downcast::<Vertex>()).expect("vertex"))
            .collect();

        for (i, vertex) in loaded.iter().enumerate() {
            let guard = vertex.read();
            prop_assert_eq!(guard.label, i as i32);
            match (links[i], guard.edge.as_ref()) {
                (None, None) => {}
                (Some(target), Some(edge)) => prop_assert!(edge.ptr_eq(&loaded[target])),
                (expected, actual) => prop_assert!(
                    false,
                    "vertex {} expected link {:?}, found {}",
                    i,
                    expected,
                    actual.is_some()
                ),
            }
        }
    }
}
