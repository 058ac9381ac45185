// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overflow store abstraction
//!
//! Durable queue of measurements the engine could not deliver. Records are
//! stored as encoded lines so a restart can replay them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ha_measurement::{line_protocol, DecodeError, EncodeError, Measurement, TimeResolution};
use serde::{Deserialize, Serialize};

/// Resolution used for overflow payloads.
pub const PAYLOAD_RESOLUTION: TimeResolution = TimeResolution::Nanos;

/// Encode a measurement as an overflow payload.
///
/// Refuses measurements whose payload would not decode again.
pub fn encode_payload(measurement: &Measurement) -> Result<String, EncodeError> {
    line_protocol::validate(measurement, PAYLOAD_RESOLUTION)?;
    Ok(measurement.to_line_protocol(PAYLOAD_RESOLUTION))
}

/// A stored, undelivered measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowRecord {
    /// Store-assigned ordinal, increasing with insertion order
    pub id: i64,

    /// Time the record was stored
    pub created_at: DateTime<Utc>,

    /// Encoded measurement
    pub payload: String,
}

impl OverflowRecord {
    /// Decode the stored measurement.
    pub fn measurement(&self) -> Result<Measurement, DecodeError> {
        Measurement::from_line_protocol(&self.payload)
    }
}

/// Overflow store trait
///
/// Backend-agnostic interface used exclusively by the delivery engine.
///
/// # Implementations
///
/// - `SqliteOverflowStore` -- file-backed or in-memory SQLite
pub trait OverflowStore: Send + Sync {
    /// Number of stored records
    fn count(&self) -> Result<usize>;

    /// Store one measurement; fails if its payload would not decode
    fn append(&self, measurement: &Measurement) -> Result<()>;

    /// Store several measurements atomically; returns how many were stored.
    /// Fails without storing anything if one payload would not decode.
    fn append_batch(&self, batch: &[Measurement]) -> Result<usize>;

    /// Snapshot of all records, oldest first
    fn all(&self) -> Result<Vec<OverflowRecord>>;

    /// Remove a record; returns `false` if it did not exist
    fn remove(&self, id: i64) -> Result<bool>;

    /// Remove several records; returns how many existed
    fn remove_many(&self, ids: &[i64]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.remove(*id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every record; returns how many were removed
    fn clear(&self) -> Result<usize>;
}
