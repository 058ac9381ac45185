// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::too_many_lines)] // Example/test code

//! Live delivery path integration tests
//!
//! Batching, failure routing to the overflow store, scheduling bound and
//! shutdown, driven through `MockSink` and an in-memory SQLite store.

mod common;

use common::{config, measurement, setup, stored_devices, FailingStore};
use ha_delivery::{
    ConfigError, EngineConfig, MockSink, OverflowStore, ResilientSink, SinkCall,
    SqliteOverflowStore, WriteError,
};
use ha_measurement::FieldValue;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IDLE: Duration = Duration::from_secs(10);

#[test]
fn test_batches_are_delivered() {
    let (engine, sink, store) = setup(config(10));

    engine.enqueue(measurement("a", 1));
    engine.enqueue(measurement("b", 2));
    assert!(engine.wait_idle(IDLE));

    assert_eq!(sink.delivered().len(), 2);
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(engine.queue_count(), 0);
    assert_eq!(engine.status().delivered_count, 2);
}

#[test]
fn test_queue_drains_in_batch_size_chunks() {
    let config = EngineConfig::builder()
        .flush_delay(Duration::from_millis(20))
        .batch_size(2)
        .health_interval(Duration::from_secs(60))
        .build();
    let (engine, sink, _store) = setup(config);

    engine.enqueue_batch((0..5).map(|i| measurement("d", i)));
    assert!(engine.wait_idle(IDLE));

    let sizes: Vec<usize> = sink
        .calls()
        .iter()
        .map(|call| match call {
            SinkCall::Batch(batch) => batch.len(),
            SinkCall::One(_) => 1,
        })
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let values: Vec<_> = sink
        .delivered()
        .iter()
        .map(|m| m.value("v").cloned())
        .collect();
    assert_eq!(
        values,
        (0..5).map(|i| Some(FieldValue::Integer(i))).collect::<Vec<_>>()
    );
}

#[test]
fn test_unreachable_batch_goes_to_overflow() {
    let (engine, sink, store) = setup(config(10));
    sink.on_batch(|_| Err(WriteError::Unreachable("connection refused".into())));

    let before = store.count().unwrap();
    engine.enqueue_batch((0..5).map(|i| measurement("m", i)));
    assert!(engine.wait_idle(IDLE));

    assert_eq!(store.count().unwrap(), before + 5);
    assert_eq!(engine.queue_count(), 0);
    assert_eq!(engine.error_count(), 5);
    assert!(!engine.is_connected());

    // Disconnected: the next batch is stored without a network attempt.
    engine.enqueue(measurement("later", 9));
    assert!(engine.wait_idle(IDLE));
    assert_eq!(sink.batch_calls(), 1);
    assert_eq!(store.count().unwrap(), 6);
}

#[test]
fn test_unauthorized_is_sticky() {
    let config = EngineConfig::builder()
        .flush_delay(Duration::from_millis(10))
        .health_interval(Duration::from_millis(10))
        .build();
    let (engine, sink, store) = setup(config);
    sink.on_batch(|_| Err(WriteError::Unauthorized("401 unauthorized access".into())));

    engine.enqueue_batch((0..3).map(|i| measurement("a", i)));
    assert!(engine.wait_idle(IDLE));
    assert!(engine.is_unauthorized());
    assert_eq!(sink.batch_calls(), 1);
    assert_eq!(store.count().unwrap(), 3);

    // Health probing stops once credentials were rejected.
    thread::sleep(Duration::from_millis(50));
    let probes = sink.health_probes();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.health_probes(), probes);

    engine.enqueue_batch((0..3).map(|i| measurement("b", i)));
    assert!(engine.wait_idle(IDLE));

    assert_eq!(sink.batch_calls(), 1);
    assert_eq!(sink.one_calls(), 0);
    assert_eq!(store.count().unwrap(), 6);
    assert_eq!(engine.error_count(), 6);
    assert!(engine.is_unauthorized());
}

#[test]
fn test_malformed_batch_is_salvaged_record_by_record() {
    let (engine, sink, store) = setup(config(10));
    sink.on_batch(|_| Err(WriteError::MalformedPayload("unable to parse".into())));
    sink.on_one(|m| {
        if m.device == "bad" {
            Err(WriteError::MalformedPayload("unable to parse".into()))
        } else {
            Ok(())
        }
    });

    engine.enqueue_batch(vec![
        measurement("good1", 1),
        measurement("bad", 2),
        measurement("good2", 3),
    ]);
    assert!(engine.wait_idle(IDLE));

    let delivered: Vec<_> = sink.delivered().into_iter().map(|m| m.device).collect();
    assert_eq!(delivered, vec!["good1", "good2"]);
    assert_eq!(sink.one_calls(), 3);
    assert_eq!(store.count().unwrap(), 0);

    let status = engine.status();
    assert_eq!(status.delivered_count, 2);
    assert_eq!(status.dropped_count, 1);
    assert_eq!(status.error_count, 0);
}

#[test]
fn test_salvage_stops_hitting_network_after_unreachable() {
    let (engine, sink, store) = setup(config(10));
    sink.on_batch(|_| Err(WriteError::MalformedPayload("bad line".into())));
    sink.on_one(|m| {
        if m.device == "second" {
            Err(WriteError::Unreachable("timeout".into()))
        } else {
            Ok(())
        }
    });

    engine.enqueue_batch(vec![
        measurement("first", 1),
        measurement("second", 2),
        measurement("third", 3),
    ]);
    assert!(engine.wait_idle(IDLE));

    assert_eq!(sink.one_call_devices(), vec!["first", "second"]);
    assert_eq!(stored_devices(&store), vec!["second", "third"]);
}

#[test]
fn test_non_finite_value_is_not_overflowed() {
    let (engine, sink, store) = setup(config(10));
    sink.on_batch(|_| Err(WriteError::Unreachable("connection refused".into())));

    engine.enqueue_batch(vec![
        measurement("a", 1),
        measurement("nan", 2).with_value("ratio", f64::NAN),
        measurement("b", 3),
    ]);
    assert!(engine.wait_idle(IDLE));

    assert_eq!(stored_devices(&store), vec!["a", "b"]);
    let status = engine.status();
    assert_eq!(status.error_count, 2);
    assert_eq!(status.dropped_count, 1);

    // Everything left in the store replays cleanly.
    let report = engine.recover().unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.discarded, 0);
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_unexpected_error_drops_without_persisting() {
    let (engine, sink, store) = setup(config(10));
    sink.on_batch(|_| Err(WriteError::Other("invalid state".into())));

    engine.enqueue_batch((0..3).map(|i| measurement("x", i)));
    assert!(engine.wait_idle(IDLE));

    assert_eq!(store.count().unwrap(), 0);
    let status = engine.status();
    assert_eq!(status.dropped_count, 3);
    assert_eq!(status.error_count, 0);
    assert!(status.connected);
}

#[test]
fn test_storage_fault_loses_records() {
    let sink = Arc::new(MockSink::new());
    sink.on_batch(|_| Err(WriteError::Unreachable("down".into())));
    let engine = ResilientSink::new(config(10), Arc::clone(&sink), Arc::new(FailingStore)).unwrap();

    engine.enqueue_batch((0..3).map(|i| measurement("x", i)));
    assert!(engine.wait_idle(IDLE));

    let status = engine.status();
    assert_eq!(status.dropped_count, 3);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.overflow_count, None);
}

#[test]
fn test_every_measurement_delivered_once() {
    let config = EngineConfig::builder()
        .flush_delay(Duration::from_millis(5))
        .batch_size(7)
        .health_interval(Duration::from_secs(60))
        .build();
    let (engine, sink, store) = setup(config);

    thread::scope(|s| {
        for producer in 0..4i64 {
            let engine = &engine;
            s.spawn(move || {
                for i in 0..50 {
                    engine.enqueue(measurement("p", producer * 1000 + i));
                    if i % 10 == 0 {
                        thread::sleep(Duration::from_millis(3));
                    }
                }
            });
        }
    });
    assert!(engine.wait_idle(IDLE));

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 200);
    let unique: BTreeSet<String> = delivered
        .iter()
        .map(|m| format!("{:?}", m.value("v")))
        .collect();
    assert_eq!(unique.len(), 200);
    assert!(sink.calls().iter().all(|call| match call {
        SinkCall::Batch(batch) => batch.len() <= 7,
        SinkCall::One(_) => false,
    }));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_concurrent_workers_never_exceed_limit() {
    let config = EngineConfig::builder()
        .flush_delay(Duration::from_millis(5))
        .batch_size(5)
        .max_concurrent_workers(2)
        .health_interval(Duration::from_secs(60))
        .build();
    let (engine, sink, _store) = setup(config);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        sink.on_batch(move |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let start = Instant::now();
    let mut i = 0;
    while start.elapsed() < Duration::from_millis(300) {
        engine.enqueue(measurement("load", i));
        i += 1;
        thread::sleep(Duration::from_millis(1));
    }
    assert!(engine.wait_idle(IDLE));

    let status = engine.status();
    assert!(status.peak_workers >= 1);
    assert!(status.peak_workers <= 2, "peak {}", status.peak_workers);
    assert!(max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(sink.delivered().len() as i64, i);
}

#[test]
fn test_second_worker_waits_out_cooldown() {
    let config = EngineConfig::builder()
        .flush_delay(Duration::from_millis(100))
        .max_concurrent_workers(2)
        .health_interval(Duration::from_secs(60))
        .build();
    let (engine, sink, _store) = setup(config);
    sink.on_batch(|_| {
        thread::sleep(Duration::from_millis(800));
        Ok(())
    });

    // Inside 2 * flush_delay of the first start: refused.
    engine.enqueue(measurement("first", 1));
    engine.enqueue(measurement("early", 2));
    let status = engine.status();
    assert_eq!(status.active_workers, 1);
    assert_eq!(status.peak_workers, 1);

    // Past the cooldown while the first worker is still writing: admitted.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(engine.status().active_workers, 1);
    engine.enqueue(measurement("late", 3));
    let status = engine.status();
    assert_eq!(status.active_workers, 2);
    assert_eq!(status.peak_workers, 2);

    assert!(engine.wait_idle(IDLE));
    assert_eq!(sink.delivered().len(), 3);
    assert_eq!(engine.status().peak_workers, 2);
}

#[test]
fn test_invalid_config_is_rejected() {
    let invalid = [
        EngineConfig::builder().batch_size(0).build(),
        EngineConfig::builder().max_concurrent_workers(0).build(),
        EngineConfig::builder().health_interval(Duration::ZERO).build(),
    ];

    for config in invalid {
        let sink = Arc::new(MockSink::new());
        let store = Arc::new(SqliteOverflowStore::new_in_memory().unwrap());
        let err = ResilientSink::new(config.clone(), sink, store).err().unwrap();
        assert!(
            matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::Invalid(_))),
            "{:?}: {}",
            config,
            err
        );
    }
}

#[test]
fn test_shutdown_spills_queue() {
    let (engine, sink, store) = setup(config(10_000));

    engine.enqueue_batch((0..4).map(|i| measurement("pending", i)));
    let start = Instant::now();
    engine.shutdown();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(sink.batch_calls(), 0);
    assert_eq!(store.count().unwrap(), 4);
    assert_eq!(engine.queue_count(), 0);
    assert!(engine.status().shutting_down);

    // Late arrivals go straight to the store.
    engine.enqueue(measurement("late", 5));
    assert_eq!(store.count().unwrap(), 5);
    assert_eq!(sink.batch_calls(), 0);

    engine.shutdown();
}

#[test]
fn test_drop_spills_queue() {
    let sink = Arc::new(MockSink::new());
    let store = Arc::new(SqliteOverflowStore::new_in_memory().unwrap());
    {
        let engine =
            ResilientSink::new(config(10_000), Arc::clone(&sink), Arc::clone(&store)).unwrap();
        engine.enqueue(measurement("a", 1));
        engine.enqueue(measurement("b", 2));
    }

    assert_eq!(stored_devices(&store), vec!["a", "b"]);
    assert_eq!(sink.batch_calls(), 0);
}
