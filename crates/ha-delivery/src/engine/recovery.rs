// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overflow replay.
//!
//! One pass walks a snapshot of the store oldest-first and writes each
//! record individually. Records appended during the pass are left for the
//! next one.

use super::Inner;
use crate::sink::{SinkClient, WriteError};
use crate::store::{OverflowRecord, OverflowStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Why a recovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Every record of the snapshot was handled
    Completed,
    /// The sink rejected credentials
    Unauthorized,
    /// The sink became unreachable
    Unreachable,
    /// The sink failed in an unclassified way; the record was kept
    SinkError,
    /// The overflow store could not be read
    StorageError,
    /// Engine shutdown was requested
    Shutdown,
}

/// Result of one recovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Records re-delivered and removed
    pub delivered: usize,
    /// Records removed without delivery (malformed or undecodable)
    pub discarded: usize,
    /// Records of the snapshot still in the store
    pub remaining: usize,
    pub outcome: RecoveryOutcome,
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: delivered={} discarded={} remaining={}",
            self.outcome, self.delivered, self.discarded, self.remaining
        )
    }
}

/// Run one pass unless another is in progress.
pub(crate) fn run<S, O>(inner: &Inner<S, O>) -> Option<RecoveryReport>
where
    S: SinkClient,
    O: OverflowStore,
{
    let _guard = match inner.state.try_begin_recovery() {
        Some(guard) => guard,
        None => {
            debug!("recovery already running");
            return None;
        }
    };

    let report = replay(inner);
    if report.delivered + report.discarded > 0 || report.outcome != RecoveryOutcome::Completed {
        info!(
            delivered = report.delivered,
            discarded = report.discarded,
            remaining = report.remaining,
            outcome = ?report.outcome,
            "recovery pass finished"
        );
    }
    Some(report)
}

fn replay<S, O>(inner: &Inner<S, O>) -> RecoveryReport
where
    S: SinkClient,
    O: OverflowStore,
{
    let mut report = RecoveryReport {
        delivered: 0,
        discarded: 0,
        remaining: 0,
        outcome: RecoveryOutcome::Completed,
    };

    if inner.state.is_unauthorized() {
        report.outcome = RecoveryOutcome::Unauthorized;
        report.remaining = match inner.store.count() {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "overflow store unavailable, remaining count unknown");
                0
            }
        };
        return report;
    }

    let records = match inner.store.all() {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "overflow store unreadable, recovery skipped");
            report.outcome = RecoveryOutcome::StorageError;
            return report;
        }
    };
    let total = records.len();
    if total > 0 {
        info!(records = total, "replaying overflow");
    }

    for record in records {
        if inner.signal.is_triggered() {
            report.outcome = RecoveryOutcome::Shutdown;
            break;
        }
        if inner.state.is_unauthorized() {
            report.outcome = RecoveryOutcome::Unauthorized;
            break;
        }

        let measurement = match record.measurement() {
            Ok(measurement) => measurement,
            Err(e) => {
                error!(
                    id = record.id,
                    error = %e,
                    payload = %record.payload,
                    "undecodable overflow record discarded"
                );
                remove(inner, &record);
                report.discarded += 1;
                inner.state.add_dropped(1);
                continue;
            }
        };

        match inner.sink.write_one(&measurement) {
            Ok(()) => {
                remove(inner, &record);
                report.delivered += 1;
                inner.state.add_delivered(1);
            }
            Err(WriteError::Unauthorized(detail)) => {
                inner.state.mark_unauthorized(&detail);
                report.outcome = RecoveryOutcome::Unauthorized;
                break;
            }
            Err(WriteError::MalformedPayload(detail)) => {
                error!(
                    id = record.id,
                    device = %measurement.device,
                    detail = %detail,
                    "stored measurement rejected as malformed, discarded"
                );
                remove(inner, &record);
                report.discarded += 1;
                inner.state.add_dropped(1);
            }
            Err(WriteError::Unreachable(detail)) => {
                debug!(detail = %detail, "recovery write failed");
                inner.state.set_connected(false);
                report.outcome = RecoveryOutcome::Unreachable;
                break;
            }
            Err(WriteError::Other(detail)) => {
                error!(
                    id = record.id,
                    detail = %detail,
                    "unexpected sink error during recovery, record kept"
                );
                report.outcome = RecoveryOutcome::SinkError;
                break;
            }
        }
    }

    report.remaining = total - report.delivered - report.discarded;
    report
}

fn remove<S, O>(inner: &Inner<S, O>, record: &OverflowRecord)
where
    O: OverflowStore,
{
    if let Err(e) = inner.store.remove(record.id) {
        // The record stays and is delivered again by a later pass.
        warn!(id = record.id, error = %e, "failed to remove overflow record");
    }
}
