// Task submission and completion latency against a live scheduler thread.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use veil_fabric::config::Config;
use veil_fabric::scheduler::{ScheduledTask, Scheduler, TaskNode};

struct CountingTask {
    counter: Arc<AtomicU64>,
}

impl ScheduledTask for CountingTask {
    fn run(&self, _scheduler: &Arc<Scheduler>) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn bench_task_round_trip(c: &mut Criterion) {
    let scheduler = Arc::new(Scheduler::new(&Config::default()).expect("scheduler setup failed"));
    let driver = Arc::clone(&scheduler);
    let handle = thread::spawn(move || Scheduler::start(&driver));

    // Let the scheduler thread reach its idle wait before measuring.
    while !scheduler.is_paused() {
        thread::yield_now();
    }

    let counter = Arc::new(AtomicU64::new(0));

    c.bench_function("scheduler_task_round_trip", |b| {
        b.iter(|| {
            let node = TaskNode::new(
                Box::new(CountingTask {
                    counter: Arc::clone(&counter),
                }),
                true,
            );
            scheduler.add_task(&node).expect("submission failed");
            node.header().wait_for_completion();
            black_box(node.header().is_completed())
        });
    });

    scheduler.request_termination();
    handle.join().expect("scheduler thread panicked");
}

criterion_group!(benches, bench_task_round_trip);
criterion_main!(benches);
