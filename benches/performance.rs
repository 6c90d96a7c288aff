//! Performance benchmarks for observer dispatch and binders.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keypath_observers::{Binder, CallbackQueue, Observer, PropertyObject, Transform};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn subject() -> Arc<PropertyObject> {
    Arc::new(PropertyObject::from_value(json!({"value": 0, "other": 0})).unwrap())
}

/// Benchmark a write with a varying number of immediate observers
fn bench_immediate_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("immediate_dispatch");

    for observers in [0, 1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("observers", observers),
            &observers,
            |b, &count| {
                let subject = subject();
                let hits = Arc::new(AtomicU64::new(0));
                let _observers: Vec<Observer> = (0..count)
                    .map(|_| {
                        let hits = Arc::clone(&hits);
                        Observer::observe(&subject, "value")
                            .old_and_new(move |_, _| {
                                hits.fetch_add(1, Ordering::Relaxed);
                            })
                            .unwrap()
                    })
                    .collect();

                let mut i = 0i64;
                b.iter(|| {
                    i += 1;
                    subject.set("value", black_box(i)).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark writes to an unobserved sibling of an observed key path
fn bench_unrelated_write(c: &mut Criterion) {
    let subject = subject();
    let _observers: Vec<Observer> = (0..100)
        .map(|_| Observer::observe(&subject, "value").no_args(|| {}).unwrap())
        .collect();

    let mut i = 0i64;
    c.bench_function("unrelated_write_100_observers", |b| {
        b.iter(|| {
            i += 1;
            subject.set("other", black_box(i)).unwrap();
        });
    });
}

/// Benchmark enqueueing onto a callback queue, flushing every batch
fn bench_queued_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("queued_dispatch");

    for batch in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            let subject = subject();
            let queue = CallbackQueue::serial("bench").unwrap();
            let _observer = Observer::observe(&subject, "value")
                .on_queue(&queue)
                .value(|new| {
                    black_box(new);
                })
                .unwrap();

            b.iter(|| {
                for i in 0..batch {
                    subject.set("value", i as i64).unwrap();
                }
                queue.flush();
            });
        });
    }

    group.finish();
}

/// Benchmark a propagated write through a two-way binder
fn bench_binder_propagation(c: &mut Criterion) {
    let from = subject();
    let to = subject();
    let _binder = Binder::two_way(&from, "value", &to, "value", Transform::None).unwrap();

    let mut i = 0i64;
    c.bench_function("two_way_binder_write", |b| {
        b.iter(|| {
            i += 1;
            from.set("value", black_box(i)).unwrap();
        });
    });
}

/// Benchmark observer creation and teardown
fn bench_observer_lifecycle(c: &mut Criterion) {
    let subject = subject();
    c.bench_function("create_and_stop", |b| {
        b.iter(|| {
            let observer = Observer::observe(&subject, "value").no_args(|| {}).unwrap();
            observer.stop();
        });
    });
}

criterion_group!(
    benches,
    bench_immediate_dispatch,
    bench_unrelated_write,
    bench_queued_dispatch,
    bench_binder_propagation,
    bench_observer_lifecycle,
);
criterion_main!(benches);
