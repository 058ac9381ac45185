// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HA Measurement
//!
//! Value object and durable text format shared by every producer and by
//! the delivery engine.
//!
//! # Overview
//!
//! ```text
//! Producer --> Measurement --> line_protocol::encode --> sink / overflow payload
//!                   ^                                          |
//!                   +------------ line_protocol::decode <------+
//! ```
//!
//! The line format is the same one InfluxDB v2 accepts, with a reserved
//! `Quality` tag carrying the measurement quality:
//!
//! ```text
//! <device>[,<tag>=<value>]*,Quality=<Good|Bad|Uncertain> <field>=<value>[,<field>=<value>]* <epoch>
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use ha_measurement::{Measurement, Quality, TimeResolution};
//!
//! let ts = Utc.with_ymd_and_hms(2023, 12, 7, 17, 34, 46).unwrap();
//! let m = Measurement::new("meter", ts)
//!     .with_quality(Quality::Uncertain)
//!     .with_tag("room", "cellar")
//!     .with_value("power", 123.5);
//!
//! let line = m.to_line_protocol(TimeResolution::Seconds);
//! assert_eq!(line, "meter,room=cellar,Quality=Uncertain power=123.5 1701970486");
//!
//! let back = Measurement::from_line_protocol(&line).unwrap();
//! assert_eq!(back, m);
//! ```

pub mod line_protocol;
pub mod measurement;
pub mod resolution;

pub use line_protocol::{decode, encode, encode_batch, validate, DecodeError, EncodeError};
pub use measurement::{FieldValue, MeasuredValue, Measurement, Quality, Tags};
pub use resolution::TimeResolution;
