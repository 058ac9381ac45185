// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 sink client
//!
//! Writes line protocol to `/api/v2/write` over blocking HTTP and maps the
//! response onto [`WriteError`]:
//!
//! | Response                    | Outcome                        |
//! |-----------------------------|--------------------------------|
//! | 2xx                         | `Ok`                           |
//! | 401, 403                    | `Unauthorized`                 |
//! | 400, 422                    | `MalformedPayload`             |
//! | other status, I/O, timeout  | `Unreachable`                  |
//! | request could not be built  | `Other`                        |

use crate::config::InfluxSettings;
use crate::sink::{SinkClient, WriteError};
use anyhow::{Context, Result};
use ha_measurement::{line_protocol, Measurement, TimeResolution};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

/// Blocking InfluxDB v2 client.
///
/// Must be created and dropped outside of an async runtime.
pub struct InfluxSink {
    client: Client,
    base_url: String,
    org: String,
    bucket: String,
    token: String,
    precision: TimeResolution,
}

impl InfluxSink {
    pub fn new(settings: &InfluxSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            org: settings.org.clone(),
            bucket: settings.bucket.clone(),
            token: settings.token.clone(),
            precision: settings.precision,
        })
    }

    pub fn precision(&self) -> TimeResolution {
        self.precision
    }

    /// `GET /ping`. Does not need a token.
    pub fn ping(&self) -> bool {
        self.client
            .get(format!("{}/ping", self.base_url))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Token {}", self.token))
    }

    fn write_body(&self, body: String) -> Result<(), WriteError> {
        let request = self
            .authorized(self.client.post(format!("{}/api/v2/write", self.base_url)))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", self.precision.as_str()),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);

        let response = match request.send() {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(WriteError::Other(e.to_string())),
            Err(e) => return Err(WriteError::Unreachable(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().unwrap_or_default();
        let detail = format!("{}: {}", status, body.trim());
        debug!(status = status.as_u16(), "write rejected");
        Err(classify(status, detail))
    }
}

/// Map a non-success status onto the failure taxonomy.
fn classify(status: StatusCode, detail: String) -> WriteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WriteError::Unauthorized(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            WriteError::MalformedPayload(detail)
        }
        _ => WriteError::Unreachable(detail),
    }
}

impl SinkClient for InfluxSink {
    fn write_one(&self, measurement: &Measurement) -> Result<(), WriteError> {
        self.write_body(line_protocol::encode(measurement, self.precision))
    }

    fn write_batch(&self, batch: &[Measurement]) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write_body(line_protocol::encode_batch(batch, self.precision))
    }

    fn health_probe(&self) -> bool {
        self.authorized(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
