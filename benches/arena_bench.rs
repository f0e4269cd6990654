// Arena allocation throughput across region-overflow boundaries.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use veil_fabric::memory::Arena;

fn bench_arena_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_allocate");

    for alloc_size in [8usize, 64, 256, 1024] {
        group.bench_with_input(
            BenchmarkId::new("size", alloc_size),
            &alloc_size,
            |b, &size| {
                let arena = Arena::new(4096).expect("arena setup failed");
                b.iter(|| {
                    let ptr = arena.allocate(size).expect("allocation failed");
                    black_box(ptr)
                });
            },
        );
    }

    group.finish();
}

fn bench_arena_inflate(c: &mut Criterion) {
    c.bench_function("arena_inflate_new_region", |b| {
        b.iter_batched(
            || Arena::new(256).expect("arena setup failed"),
            |arena| {
                for _ in 0..32 {
                    black_box(arena.allocate(64).expect("allocation failed"));
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_arena_allocate, bench_arena_inflate);
criterion_main!(benches);
