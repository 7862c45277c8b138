use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fabric_monitor::core::{
    callback_fn, ApiError, BatchedCallback, Callback, Scheduler, SharedCallback,
};
use fabric_monitor::types::{AttributeKind, EngineConfig, TaskKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn bench_batched_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_cycle");
    for size in [4usize, 64, 512] {
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&delivered);
        let batched = BatchedCallback::new(
            size,
            callback_fn(move |values: &Vec<u64>| {
                sink.fetch_add(values.len(), Ordering::Relaxed);
            }),
        );
        let slots: Vec<SharedCallback<u64>> = (0..size).map(|i| batched.slot(i)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for (i, slot) in slots.iter().enumerate() {
                    slot.on_complete(black_box(&(i as u64)));
                }
            })
        });
    }
    group.finish();
}

fn bench_schedule_dedup(c: &mut Criterion) {
    let config = EngineConfig {
        refresh_rate_ms: 3_600_000,
        worker_threads: 1,
        ..Default::default()
    };
    let Ok(scheduler) = Scheduler::new(&config) else {
        return;
    };
    let registry = scheduler.registry::<u64>(AttributeKind::PortCounters);
    let key = TaskKey::new(AttributeKind::PortCounters, "1:1");

    c.bench_function("schedule_attach_detach", |b| {
        b.iter(|| {
            let callback = callback_fn(|_: &u64| {});
            let task = scheduler.schedule(
                &registry,
                key.clone(),
                "bench",
                Arc::new(|| Ok::<u64, ApiError>(0)),
                callback.clone(),
            );
            scheduler.unschedule(&registry, &task, &callback);
        })
    });
    scheduler.shutdown();
}

criterion_group!(benches, bench_batched_cycle, bench_schedule_dedup);
criterion_main!(benches);
