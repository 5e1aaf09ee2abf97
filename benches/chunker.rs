use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memoria::chunker::chunk;

fn bench_chunker(c: &mut Criterion) {
    let short = "This is a short message.".repeat(1);
    let medium = "The quick brown fox jumps over the lazy dog. ".repeat(50);
    let long = "The quick brown fox jumps over the lazy dog. ".repeat(500);

    let mut group = c.benchmark_group("chunk");
    group.bench_function("short_text", |b| {
        b.iter(|| chunk(black_box(&short), 256, 50, true))
    });
    group.bench_function("medium_text", |b| {
        b.iter(|| chunk(black_box(&medium), 256, 50, true))
    });
    group.bench_function("long_text_with_overlap", |b| {
        b.iter(|| chunk(black_box(&long), 256, 50, true))
    });
    group.bench_function("long_text_no_overlap", |b| {
        b.iter(|| chunk(black_box(&long), 256, 0, false))
    });
    group.finish();
}

criterion_group!(benches, bench_chunker);
criterion_main!(benches);
