use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memoria::storage::InMemoryChunkStore;
use memoria::vector_index::VectorIndex;
use tokio::runtime::Runtime;

fn seeded_index(rt: &Runtime, n: usize, dim: usize) -> VectorIndex {
    let index = VectorIndex::new(Arc::new(InMemoryChunkStore::new()));
    rt.block_on(async {
        for i in 0..n {
            let mut v = vec![0.0f32; dim];
            v[i % dim] = 1.0;
            index
                .store_chunks_for_message(&format!("m{i}"), "s1", vec![format!("chunk {i}")], vec![v])
                .await
                .unwrap();
        }
    });
    index
}

fn bench_find_similar(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dim = 384;
    let index = seeded_index(&rt, 2000, dim);
    let mut query = vec![0.0f32; dim];
    query[0] = 1.0;

    c.bench_function("find_similar_2000_chunks", |b| {
        b.iter(|| {
            rt.block_on(index.find_similar(black_box(&query), Some("s1"), 10))
                .unwrap()
        })
    });

    c.bench_function("find_similar_within_threshold_2000_chunks", |b| {
        b.iter(|| {
            rt.block_on(index.find_similar_within_threshold(black_box(&query), Some("s1"), 0.5))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_find_similar);
criterion_main!(benches);
