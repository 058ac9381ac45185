// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink client contract
//!
//! The engine only talks to the remote time-series store through
//! [`SinkClient`]. Every failure is reported as one of the four
//! [`WriteError`] classes; the engine's routing decisions are made on the
//! class alone.

use ha_measurement::Measurement;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

/// Classified write failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// Credential or permission failure. Halts all direct writes.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The payload was rejected and can never succeed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Transient network or server fault.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// Anything not classified above.
    #[error("unexpected sink error: {0}")]
    Other(String),
}

impl WriteError {
    /// Short class name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::Unauthorized(_) => "unauthorized",
            WriteError::MalformedPayload(_) => "malformed",
            WriteError::Unreachable(_) => "unreachable",
            WriteError::Other(_) => "other",
        }
    }
}

/// Remote write endpoint.
///
/// Implementations must bound the duration of each call (request timeout)
/// so a hung connection cannot starve a flush worker.
pub trait SinkClient: Send + Sync {
    /// Write a single measurement.
    fn write_one(&self, measurement: &Measurement) -> Result<(), WriteError>;

    /// Write several measurements in one request.
    fn write_batch(&self, batch: &[Measurement]) -> Result<(), WriteError>;

    /// Check whether the sink is reachable and healthy.
    fn health_probe(&self) -> bool;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

type BatchHandler = Box<dyn Fn(&[Measurement]) -> Result<(), WriteError> + Send + Sync>;
type OneHandler = Box<dyn Fn(&Measurement) -> Result<(), WriteError> + Send + Sync>;

/// A call observed by [`MockSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Batch(Vec<Measurement>),
    One(Measurement),
}

/// Scriptable in-process sink.
///
/// Accepts everything until handlers are installed. Every call is
/// recorded, and accepted measurements are kept in delivery order.
pub struct MockSink {
    on_batch: RwLock<BatchHandler>,
    on_one: RwLock<OneHandler>,
    healthy: AtomicBool,
    probes: AtomicUsize,
    calls: Mutex<Vec<SinkCall>>,
    delivered: Mutex<Vec<Measurement>>,
}

impl MockSink {
    /// Create a healthy mock sink that accepts every write.
    pub fn new() -> Self {
        let on_batch: BatchHandler = Box::new(|_: &[Measurement]| Ok(()));
        let on_one: OneHandler = Box::new(|_: &Measurement| Ok(()));
        Self {
            on_batch: RwLock::new(on_batch),
            on_one: RwLock::new(on_one),
            healthy: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Decide the outcome of every batch write.
    pub fn on_batch<F>(&self, handler: F)
    where
        F: Fn(&[Measurement]) -> Result<(), WriteError> + Send + Sync + 'static,
    {
        *self.on_batch.write() = Box::new(handler);
    }

    /// Decide the outcome of every single-record write.
    pub fn on_one<F>(&self, handler: F)
    where
        F: Fn(&Measurement) -> Result<(), WriteError> + Send + Sync + 'static,
    {
        *self.on_one.write() = Box::new(handler);
    }

    /// Set the result of the next health probes.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// All calls in the order they were made.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::Batch(_)))
            .count()
    }

    pub fn one_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::One(_)))
            .count()
    }

    /// Devices passed to `write_one`, in call order.
    pub fn one_call_devices(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SinkCall::One(m) => Some(m.device.clone()),
                SinkCall::Batch(_) => None,
            })
            .collect()
    }

    pub fn health_probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Measurements accepted so far.
    pub fn delivered(&self) -> Vec<Measurement> {
        self.delivered.lock().clone()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkClient for MockSink {
    fn write_one(&self, measurement: &Measurement) -> Result<(), WriteError> {
        self.calls.lock().push(SinkCall::One(measurement.clone()));
        let result = (*self.on_one.read())(measurement);
        if result.is_ok() {
            self.delivered.lock().push(measurement.clone());
        }
        result
    }

    fn write_batch(&self, batch: &[Measurement]) -> Result<(), WriteError> {
        self.calls.lock().push(SinkCall::Batch(batch.to_vec()));
        let result = (*self.on_batch.read())(batch);
        if result.is_ok() {
            self.delivered.lock().extend_from_slice(batch);
        }
        result
    }

    fn health_probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}
