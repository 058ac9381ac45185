// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Epoch timestamp resolution.
//!
//! The trailing integer of a line is the time since 1970-01-01T00:00:00Z in
//! one of four units. Each unit has a fixed digit width, which is how a
//! decoder tells them apart:
//!
//! ```text
//! 1701970486             s   (10 digits)
//! 1701970486123          ms  (13 digits)
//! 1701970486123456       us  (16 digits)
//! 1701970486123456700    ns  (19 digits)
//! ```

use crate::line_protocol::DecodeError;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resolution of the epoch timestamp written at the end of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeResolution {
    /// Seconds.
    #[serde(rename = "s")]
    Seconds,
    /// Milliseconds.
    #[serde(rename = "ms")]
    Millis,
    /// Microseconds.
    #[serde(rename = "us")]
    Micros,
    /// Nanoseconds.
    #[default]
    #[serde(rename = "ns")]
    Nanos,
}

impl TimeResolution {
    /// All resolutions, coarsest first.
    pub const ALL: [TimeResolution; 4] = [
        TimeResolution::Seconds,
        TimeResolution::Millis,
        TimeResolution::Micros,
        TimeResolution::Nanos,
    ];

    /// Short name, as used by the InfluxDB `precision` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeResolution::Seconds => "s",
            TimeResolution::Millis => "ms",
            TimeResolution::Micros => "us",
            TimeResolution::Nanos => "ns",
        }
    }

    /// Digit width of an epoch value at this resolution.
    pub fn digits(self) -> usize {
        match self {
            TimeResolution::Seconds => 10,
            TimeResolution::Millis => 13,
            TimeResolution::Micros => 16,
            TimeResolution::Nanos => 19,
        }
    }

    /// Infer the resolution from the digit count of an epoch value.
    pub fn from_digit_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.digits() == count)
    }

    fn nanos_per_unit(self) -> i64 {
        match self {
            TimeResolution::Seconds => 1_000_000_000,
            TimeResolution::Millis => 1_000_000,
            TimeResolution::Micros => 1_000,
            TimeResolution::Nanos => 1,
        }
    }

    fn units_per_second(self) -> i64 {
        1_000_000_000 / self.nanos_per_unit()
    }

    /// Time since the epoch in units of this resolution (truncating).
    pub fn epoch(self, time: &DateTime<Utc>) -> i64 {
        let secs = time.timestamp();
        let subsec = i64::from(time.timestamp_subsec_nanos()) / self.nanos_per_unit();
        secs.saturating_mul(self.units_per_second())
            .saturating_add(subsec)
    }

    /// Convert an epoch value in units of this resolution back to a UTC instant.
    ///
    /// Returns `None` when the value is outside the representable range.
    pub fn from_epoch(self, value: i64) -> Option<DateTime<Utc>> {
        let per_second = self.units_per_second();
        let secs = value.div_euclid(per_second);
        let nanos = value.rem_euclid(per_second) * self.nanos_per_unit();
        DateTime::from_timestamp(secs, nanos as u32)
    }

    /// Epoch value zero-padded to the resolution's digit width.
    pub fn format_epoch(self, time: &DateTime<Utc>) -> String {
        format!("{:0width$}", self.epoch(time), width = self.digits())
    }

    /// Drop the sub-unit part of a timestamp.
    pub fn truncate(self, time: DateTime<Utc>) -> DateTime<Utc> {
        let per_unit = self.nanos_per_unit() as u32;
        let nanos = time.nanosecond();
        time.with_nanosecond(nanos - nanos % per_unit).unwrap_or(time)
    }
}

impl fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeResolution {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownResolution(s.to_string()))
    }
}
