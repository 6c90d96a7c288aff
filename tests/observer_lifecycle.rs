//! Lifecycle tests: stop idempotence, teardown races and concurrent writers.

use keypath_observers::{Binder, Observer, ObservingOptions, PropertyObject, Transform};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn object(value: Value) -> Arc<PropertyObject> {
    Arc::new(PropertyObject::from_value(value).unwrap())
}

// --- Properties ---

proptest! {
    #[test]
    fn test_stop_any_number_of_times_unregisters_once(stops in 1usize..16, clones in 1usize..4) {
        let subject = object(json!({"x": 0}));
        let observer = Observer::observe(&subject, "x").no_args(|| {}).unwrap();
        let handles: Vec<Observer> = (0..clones).map(|_| observer.clone()).collect();

        for i in 0..stops {
            handles[i % clones].stop();
        }
        drop(handles);
        drop(observer);

        prop_assert_eq!(subject.unregister_count(), 1);
        prop_assert_eq!(subject.registration_count(), 0);
    }

    #[test]
    fn test_callbacks_see_every_write_in_order(writes in proptest::collection::vec(-1000i64..1000, 1..32)) {
        let subject = object(json!({"n": 0}));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = Observer::observe(&subject, "n")
            .value(move |new| sink.lock().push(new.and_then(Value::as_i64)))
            .unwrap();

        for value in &writes {
            subject.set("n", *value).unwrap();
        }

        let expected: Vec<Option<i64>> = writes.iter().copied().map(Some).collect();
        prop_assert_eq!(seen.lock().clone(), expected);
    }

    #[test]
    fn test_one_way_binding_tracks_source(writes in proptest::collection::vec(any::<bool>(), 1..32)) {
        let from = object(json!({"flag": false}));
        let to = object(json!({}));
        let _binder = Binder::one_way(&from, "flag", &to, "mirror").unwrap();

        for value in &writes {
            from.set("flag", *value).unwrap();
            prop_assert_eq!(to.get("mirror").unwrap(), json!(value));
        }
    }
}

// --- Concurrency ---

#[test]
fn test_concurrent_stop_unregisters_once() {
    let subject = object(json!({"x": 0}));
    let observer = Observer::observe(&subject, "x").no_args(|| {}).unwrap();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let observer = observer.clone();
            thread::spawn(move || observer.stop())
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    assert!(!observer.is_active());
    assert_eq!(subject.unregister_count(), 1);
}

#[test]
fn test_stop_while_writer_runs() {
    let subject = object(json!({"x": 0}));
    let calls = Arc::new(Mutex::new(0u64));
    let counter = Arc::clone(&calls);
    let observer = Observer::observe(&subject, "x")
        .no_args(move || *counter.lock() += 1)
        .unwrap();

    let writer = {
        let subject = Arc::clone(&subject);
        thread::spawn(move || {
            for i in 0..500 {
                subject.set("x", i).unwrap();
            }
        })
    };
    observer.stop();
    let after_stop = *calls.lock();
    writer.join().unwrap();

    // At most the one callback in flight when stop ran completes afterwards.
    assert!(*calls.lock() <= after_stop + 1);
    assert_eq!(subject.registration_count(), 0);
}

#[test]
fn test_initial_precedes_concurrent_changes() {
    for _ in 0..20 {
        let subject = object(json!({"x": 0}));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let writer = {
            let subject = Arc::clone(&subject);
            thread::spawn(move || {
                for i in 1..=50 {
                    subject.set("x", i).unwrap();
                }
            })
        };

        let sink = Arc::clone(&seen);
        let _observer = Observer::observe(&subject, "x")
            .options(ObservingOptions::NONE.with_initial())
            .change(move |change| sink.lock().push(change.clone()))
            .unwrap();
        writer.join().unwrap();

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert!(seen[0].indexes.is_none());
        // Later values never precede the initial one.
        let values: Vec<i64> = seen
            .iter()
            .filter_map(|c| c.new.as_ref().and_then(Value::as_i64))
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
    }
}

#[test]
fn test_two_way_binding_concurrent_writers_do_not_deadlock() {
    let left = object(json!({"value": 0}));
    let right = object(json!({"value": 0}));
    let binder = Binder::two_way(&left, "value", &right, "value", Transform::None).unwrap();

    let writers: Vec<_> = [Arc::clone(&left), Arc::clone(&right)]
        .into_iter()
        .enumerate()
        .map(|(side, subject)| {
            thread::spawn(move || {
                for i in 0..200 {
                    subject.set("value", (side * 1000 + i) as i64).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    // Quiescent again: a single write syncs both sides.
    left.set("value", 42).unwrap();
    assert_eq!(right.get("value").unwrap(), json!(42));
    right.set("value", 7).unwrap();
    assert_eq!(left.get("value").unwrap(), json!(7));
    assert!(binder.is_active());
}

#[test]
fn test_two_way_binding_ignores_own_writes_delivered_elsewhere() {
    let from = object(json!({"x": 0}));
    let to = object(json!({"x": 0, "other": 0}));
    let binder = Binder::two_way(&from, "x", &to, "x", Transform::None).unwrap();

    let history = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&history);
    let _history = Observer::observe(&from, "x")
        .value(move |new| sink.lock().push(new.and_then(Value::as_i64)))
        .unwrap();

    // Park another thread inside a notification on `to`, so it is the one
    // delivering every change written to `to` meanwhile.
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<()>();
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
    let _blocker = Observer::observe(&to, "other")
        .no_args(move || {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
    let drainer = {
        let to = Arc::clone(&to);
        thread::spawn(move || to.set("other", 1).unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    from.set("x", 1).unwrap();
    from.set("x", 2).unwrap();
    release_tx.send(()).unwrap();
    drainer.join().unwrap();

    assert_eq!(binder.stats().forward, 3);
    assert_eq!(binder.stats().reverse, 0);
    assert_eq!(from.get("x").unwrap(), json!(2));
    assert_eq!(to.get("x").unwrap(), json!(2));
    assert_eq!(*history.lock(), vec![Some(1), Some(2)]);
}
