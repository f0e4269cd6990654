// Ordered-queue acquire/release cost, uncontended and under contention.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use veil_fabric::config::Config;
use veil_fabric::sync::{OrderedQueue, QueueClient};

fn bench_uncontended_round_trip(c: &mut Criterion) {
    let config = Config::default();
    let queue = OrderedQueue::new();
    let client = QueueClient::new(&config).expect("client setup failed");

    c.bench_function("ordered_queue_uncontended_round_trip", |b| {
        b.iter(|| {
            client.wait(black_box(&queue)).expect("wait failed");
            client.exit(black_box(&queue)).expect("exit failed");
        });
    });
}

fn bench_contended_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordered_queue_contended");

    for thread_count in [2usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            &thread_count,
            |b, &threads| {
                b.iter_batched(
                    || Arc::new(OrderedQueue::new()),
                    |queue| {
                        let handles: Vec<_> = (0..threads)
                            .map(|_| {
                                let queue = Arc::clone(&queue);
                                thread::spawn(move || {
                                    let config = Config::default();
                                    let client = QueueClient::new(&config).unwrap();
                                    for _ in 0..50 {
                                        client.wait(&queue).unwrap();
                                        client.exit(&queue).unwrap();
                                    }
                                })
                            })
                            .collect();
                        for h in handles {
                            h.join().unwrap();
                        }
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended_round_trip, bench_contended_round_trip);
criterion_main!(benches);
