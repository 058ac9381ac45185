// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine flags, counters and the status snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{error, info, warn};

/// Flags and counters shared by the workers, the recovery routine and the
/// health monitor of one engine instance.
///
/// The three flags are independent: `connected` follows the last probe or
/// write outcome, `unauthorized` is sticky for the engine's lifetime, and
/// `recovery_in_progress` is the single-flight guard.
#[derive(Debug)]
pub(crate) struct SharedState {
    connected: AtomicBool,
    connected_since: Mutex<DateTime<Utc>>,
    unauthorized: AtomicBool,
    recovery_in_progress: AtomicBool,
    /// Measurements routed to the overflow store
    error_count: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    peak_workers: AtomicUsize,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            connected_since: Mutex::new(Utc::now()),
            unauthorized: AtomicBool::new(false),
            recovery_in_progress: AtomicBool::new(false),
            error_count: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            peak_workers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Update the connection flag; returns `true` if it changed.
    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous == connected {
            return false;
        }
        *self.connected_since.lock() = Utc::now();
        if connected {
            info!("sink reachable again");
        } else {
            warn!("sink unreachable, overflowing to local store");
        }
        true
    }

    pub(crate) fn is_unauthorized(&self) -> bool {
        self.unauthorized.load(Ordering::Acquire)
    }

    /// Set the sticky unauthorized flag.
    pub(crate) fn mark_unauthorized(&self, detail: &str) {
        if !self.unauthorized.swap(true, Ordering::AcqRel) {
            error!(
                detail,
                "sink rejected credentials; direct writes halted until restart"
            );
        }
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.recovery_in_progress.load(Ordering::Acquire)
    }

    /// Claim the recovery guard. Returns `None` if a pass is running.
    pub(crate) fn try_begin_recovery(&self) -> Option<RecoveryGuard<'_>> {
        self.recovery_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RecoveryGuard { state: self })
    }

    pub(crate) fn add_overflowed(&self, count: usize) {
        self.error_count.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_workers(&self, running: usize) {
        self.peak_workers.fetch_max(running, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            connected: self.is_connected(),
            connected_since: *self.connected_since.lock(),
            unauthorized: self.is_unauthorized(),
            recovery_in_progress: self.is_recovering(),
            queue_count: 0,
            active_workers: 0,
            peak_workers: self.peak_workers.load(Ordering::Relaxed),
            error_count: self.error_count(),
            delivered_count: self.delivered.load(Ordering::Relaxed),
            dropped_count: self.dropped.load(Ordering::Relaxed),
            overflow_count: None,
            shutting_down: false,
        }
    }
}

/// Releases the recovery flag when dropped.
pub(crate) struct RecoveryGuard<'a> {
    state: &'a SharedState,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.state
            .recovery_in_progress
            .store(false, Ordering::Release);
    }
}

/// Point-in-time view of an engine, for heartbeats and health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Last known sink reachability
    pub connected: bool,

    /// When `connected` last changed (or engine start)
    pub connected_since: DateTime<Utc>,

    /// Sticky credential failure
    pub unauthorized: bool,

    pub recovery_in_progress: bool,

    /// Measurements waiting in memory
    pub queue_count: usize,

    pub active_workers: usize,

    /// Highest number of concurrently running flush workers
    pub peak_workers: usize,

    /// Measurements routed to the overflow store
    pub error_count: u64,

    pub delivered_count: u64,

    /// Measurements lost (malformed, unexpected errors, storage faults)
    pub dropped_count: u64,

    /// Records in the overflow store, if the store answered
    pub overflow_count: Option<usize>,

    pub shutting_down: bool,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connected={} unauthorized={} queue={} workers={} delivered={} overflowed={} dropped={}",
            self.connected,
            self.unauthorized,
            self.queue_count,
            self.active_workers,
            self.delivered_count,
            self.error_count,
            self.dropped_count
        )?;
        match self.overflow_count {
            Some(count) => write!(f, " stored={}", count),
            None => write!(f, " stored=?"),
        }
    }
}
