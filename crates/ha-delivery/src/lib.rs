// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HA Delivery
//!
//! Store-and-forward delivery of measurements to a remote time-series sink.
//!
//! # Architecture
//!
//! ```text
//! Producers --enqueue--> ResilientSink --batches--> SinkClient (InfluxDB v2)
//!                             |    ^
//!                   overflow  v    |  replay
//!                         OverflowStore (SQLite)
//! ```
//!
//! Failures are classified into four classes ([`WriteError`]):
//!
//! - **Unauthorized**: sticky, halts direct writes, data goes to overflow
//! - **MalformedPayload**: batch retried record by record, bad records dropped
//! - **Unreachable**: data goes to overflow, replayed once the sink is back
//! - **Other**: logged and dropped
//!
//! # Usage
//!
//! ```bash
//! # Pipe line protocol from a producer into InfluxDB
//! meter-reader | ha-delivery --config delivery.toml run
//!
//! # Inspect and replay the overflow store
//! ha-delivery --db overflow.db stats
//! ha-delivery --config delivery.toml drain
//! ```

pub mod config;
pub mod engine;
pub mod influx;
pub mod sink;
pub mod sqlite;
pub mod store;

pub use config::{
    ConfigError, DeliveryConfig, EngineConfig, EngineConfigBuilder, EngineSettings,
    InfluxSettings, OverflowSettings,
};
pub use engine::{EngineStatus, RecoveryOutcome, RecoveryReport, ResilientSink};
pub use influx::InfluxSink;
pub use sink::{MockSink, SinkCall, SinkClient, WriteError};
pub use sqlite::SqliteOverflowStore;
pub use store::{OverflowRecord, OverflowStore};
