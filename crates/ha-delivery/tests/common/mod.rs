// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(dead_code)]

//! Shared fixtures for engine integration tests.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use ha_delivery::{
    EngineConfig, MockSink, OverflowRecord, OverflowStore, ResilientSink, SqliteOverflowStore,
};
use ha_measurement::Measurement;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type TestEngine = ResilientSink<MockSink, SqliteOverflowStore>;

/// Fast flush, slow health probe (so the monitor stays out of the way).
pub fn config(flush_ms: u64) -> EngineConfig {
    EngineConfig::builder()
        .flush_delay(Duration::from_millis(flush_ms))
        .batch_size(50)
        .max_concurrent_workers(2)
        .health_interval(Duration::from_secs(60))
        .build()
}

pub fn measurement(device: &str, value: i64) -> Measurement {
    let ts = Utc.timestamp_opt(1_701_970_486, 123_456_789).unwrap();
    Measurement::new(device, ts).with_value("v", value)
}

pub fn setup(config: EngineConfig) -> (TestEngine, Arc<MockSink>, Arc<SqliteOverflowStore>) {
    let sink = Arc::new(MockSink::new());
    let store = Arc::new(SqliteOverflowStore::new_in_memory().unwrap());
    let engine = ResilientSink::new(config, Arc::clone(&sink), Arc::clone(&store)).unwrap();
    (engine, sink, store)
}

/// Devices of the stored records, oldest first.
pub fn stored_devices(store: &SqliteOverflowStore) -> Vec<String> {
    store
        .all()
        .unwrap()
        .iter()
        .map(|r| r.measurement().unwrap().device)
        .collect()
}

pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Store whose every operation fails, like a full disk.
pub struct FailingStore;

impl OverflowStore for FailingStore {
    fn count(&self) -> Result<usize> {
        bail!("disk unavailable")
    }

    fn append(&self, _measurement: &Measurement) -> Result<()> {
        bail!("disk full")
    }

    fn append_batch(&self, _batch: &[Measurement]) -> Result<usize> {
        bail!("disk full")
    }

    fn all(&self) -> Result<Vec<OverflowRecord>> {
        bail!("disk unavailable")
    }

    fn remove(&self, _id: i64) -> Result<bool> {
        bail!("disk unavailable")
    }

    fn clear(&self) -> Result<usize> {
        bail!("disk unavailable")
    }
}
