// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resilient delivery engine
//!
//! ```text
//! enqueue ──> queue ──> flush worker (<= max_concurrent_workers)
//!                          │  1. recovery pass if overflow is non-empty
//!                          │  2. debounce flush_delay
//!                          │  3. drain snapshot in batch_size chunks
//!                          v
//!                     SinkClient ──(failure)──> OverflowStore
//!                          ^                         │
//!                          └──── recovery ───────────┘
//!
//! health monitor: probes the sink every health_interval
//! ```
//!
//! A new worker is admitted when none is running, or when fewer than
//! `max_concurrent_workers` run and the last one started more than
//! `2 * flush_delay` ago.

mod monitor;
mod recovery;
mod signal;
mod status;
mod worker;

pub use recovery::{RecoveryOutcome, RecoveryReport};
pub use status::EngineStatus;

use anyhow::{Context, Result};
use crate::config::EngineConfig;
use crate::sink::SinkClient;
use crate::store::OverflowStore;
use ha_measurement::Measurement;
use parking_lot::Mutex;
use signal::ShutdownSignal;
use status::SharedState;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll period of [`ResilientSink::wait_idle`].
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Worker bookkeeping, guarded as one unit so admission is atomic.
#[derive(Default)]
struct Scheduler {
    running: usize,
    last_start: Option<Instant>,
    handles: Vec<JoinHandle<()>>,
    next_id: u64,
}

/// State shared between the engine handle and its threads.
pub(crate) struct Inner<S, O> {
    pub(crate) config: EngineConfig,
    pub(crate) sink: Arc<S>,
    pub(crate) store: Arc<O>,
    pub(crate) queue: Mutex<VecDeque<Measurement>>,
    scheduler: Mutex<Scheduler>,
    pub(crate) state: SharedState,
    pub(crate) signal: ShutdownSignal,
}

impl<S, O> Inner<S, O>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    /// Start a flush worker if the admission rule allows it.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if self.signal.is_triggered() {
            return;
        }

        let cooldown = self.config.flush_delay * 2;
        let admit = scheduler.running == 0
            || (scheduler.running < self.config.max_concurrent_workers
                && scheduler
                    .last_start
                    .map_or(true, |started| started.elapsed() > cooldown));
        if !admit {
            return;
        }

        scheduler.handles.retain(|h| !h.is_finished());
        let id = scheduler.next_id;
        scheduler.next_id += 1;

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("ha-flush-{}", id))
            .spawn(move || worker::run(inner));

        match spawned {
            Ok(handle) => {
                scheduler.running += 1;
                scheduler.last_start = Some(Instant::now());
                scheduler.handles.push(handle);
                self.state.record_workers(scheduler.running);
                debug!(worker = id, running = scheduler.running, "flush worker started");
            }
            Err(e) => error!(error = %e, "failed to spawn flush worker"),
        }
    }

    /// Called by a worker as its last step.
    pub(crate) fn worker_finished(self: &Arc<Self>) {
        {
            let mut scheduler = self.scheduler.lock();
            scheduler.running = scheduler.running.saturating_sub(1);
        }
        if !self.queue.lock().is_empty() {
            self.schedule();
        }
    }

    fn running_workers(&self) -> usize {
        self.scheduler.lock().running
    }

    /// Move everything left in the queue to the overflow store.
    fn spill_queue(&self) {
        let pending: Vec<Measurement> = self.queue.lock().drain(..).collect();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "spilling queued measurements to overflow");
        worker::persist(self, &pending);
    }
}

/// Store-and-forward front of a [`SinkClient`].
///
/// Producers call [`enqueue`](Self::enqueue); delivery, batching, overflow
/// and replay happen on background threads. Dropping the engine performs
/// [`shutdown`](Self::shutdown).
///
/// # Example
///
/// ```
/// use ha_delivery::{EngineConfig, MockSink, ResilientSink, SqliteOverflowStore};
/// use ha_measurement::Measurement;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let sink = Arc::new(MockSink::new());
/// let store = Arc::new(SqliteOverflowStore::new_in_memory().unwrap());
/// let config = EngineConfig::builder()
///     .flush_delay(Duration::from_millis(10))
///     .build();
///
/// let engine = ResilientSink::new(config, Arc::clone(&sink), store).unwrap();
/// engine.enqueue(Measurement::now("meter").with_value("power", 42.0));
/// assert!(engine.wait_idle(Duration::from_secs(5)));
/// assert_eq!(sink.delivered().len(), 1);
/// ```
pub struct ResilientSink<S, O>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    inner: Arc<Inner<S, O>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<S, O> ResilientSink<S, O>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    /// Create the engine and start its health monitor.
    ///
    /// Fails with [`ConfigError`](crate::ConfigError) if `config` does not
    /// validate.
    pub fn new(config: EngineConfig, sink: Arc<S>, store: Arc<O>) -> Result<Self> {
        config.validate()?;
        info!(
            flush_delay_ms = config.flush_delay.as_millis() as u64,
            batch_size = config.batch_size,
            max_workers = config.max_concurrent_workers,
            health_interval_s = config.health_interval.as_secs(),
            "delivery engine starting"
        );

        let inner = Arc::new(Inner {
            config,
            sink,
            store,
            queue: Mutex::new(VecDeque::new()),
            scheduler: Mutex::new(Scheduler::default()),
            state: SharedState::new(),
            signal: ShutdownSignal::new(),
        });
        let monitor =
            monitor::spawn(Arc::clone(&inner)).context("Failed to spawn health monitor")?;

        Ok(Self {
            inner,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Queue a measurement for delivery. Never blocks on I/O, never fails.
    ///
    /// After shutdown the measurement goes straight to the overflow store.
    pub fn enqueue(&self, measurement: Measurement) {
        self.inner.queue.lock().push_back(measurement);
        self.after_enqueue();
    }

    /// Queue several measurements, keeping their order.
    pub fn enqueue_batch<I>(&self, measurements: I)
    where
        I: IntoIterator<Item = Measurement>,
    {
        self.inner.queue.lock().extend(measurements);
        self.after_enqueue();
    }

    fn after_enqueue(&self) {
        if self.inner.signal.is_triggered() {
            self.inner.spill_queue();
        } else {
            self.inner.schedule();
        }
    }

    /// Run one recovery pass on the calling thread.
    ///
    /// Returns `None` if another pass is already running.
    pub fn recover(&self) -> Option<RecoveryReport> {
        recovery::run(&self.inner)
    }

    /// Block until no worker runs and the queue is empty.
    ///
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.running_workers() == 0 && self.inner.queue.lock().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(IDLE_POLL);
        }
    }

    pub fn queue_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Measurements routed to the overflow store so far.
    pub fn error_count(&self) -> u64 {
        self.inner.state.error_count()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.inner.state.is_unauthorized()
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.state.is_recovering()
    }

    pub fn status(&self) -> EngineStatus {
        let mut status = self.inner.state.snapshot();
        status.queue_count = self.queue_count();
        status.active_workers = self.inner.running_workers();
        status.shutting_down = self.inner.signal.is_triggered();
        status.overflow_count = match self.inner.store.count() {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "overflow store did not report its size");
                None
            }
        };
        status
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.inner.sink
    }

    pub fn store(&self) -> &Arc<O> {
        &self.inner.store
    }

    /// Stop the engine.
    ///
    /// Stops scheduling and the health monitor, lets running workers finish
    /// their current batch, then spills the queue to the overflow store.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.signal.trigger() {
            return;
        }
        info!("delivery engine shutting down");

        if let Some(handle) = self.monitor.lock().take() {
            if handle.join().is_err() {
                error!("health monitor panicked");
            }
        }

        loop {
            let handles = std::mem::take(&mut self.inner.scheduler.lock().handles);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    error!("flush worker panicked");
                }
            }
        }

        self.inner.spill_queue();
        info!(status = %self.status(), "delivery engine stopped");
    }
}

impl<S, O> Drop for ResilientSink<S, O>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
