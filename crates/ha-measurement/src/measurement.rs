// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Measurement value object.
//!
//! A measurement is a named, timestamped, tagged set of typed values. It is
//! built by a producer at observation time and treated as immutable once
//! handed to the delivery engine.

use crate::line_protocol::{self, DecodeError};
use crate::resolution::TimeResolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality flag attached to every measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    Good,
    Bad,
    Uncertain,
}

impl Quality {
    /// Name as written in the `Quality` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Good => "Good",
            Quality::Bad => "Bad",
            Quality::Uncertain => "Uncertain",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Good" => Ok(Quality::Good),
            "Bad" => Ok(Quality::Bad),
            "Uncertain" => Ok(Quality::Uncertain),
            other => Err(DecodeError::UnknownQuality(other.to_string())),
        }
    }
}

/// A value that can be stored in a measurement field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
}

impl FieldValue {
    /// Format this value for the line format.
    ///
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - Float: invariant decimal form, no suffix (e.g., `3.15`)
    /// - Boolean: `t` or `f`
    /// - String: double quoted, inner quotes escaped (e.g., `"say \"hi\""`)
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Boolean(v) => {
                if *v {
                    "t".to_string()
                } else {
                    "f".to_string()
                }
            }
            FieldValue::String(v) => format!("\"{}\"", v.replace('"', "\\\"")),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(f64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// Insertion-ordered tag map with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    /// Create an empty tag map.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a tag. An existing key keeps its position and gets the new
    /// value; the previous value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

/// A named field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredValue {
    pub name: String,
    pub value: FieldValue,
}

impl MeasuredValue {
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single observation from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Device (series) name. Must not be empty.
    pub device: String,

    /// Quality of the observation.
    pub quality: Quality,

    /// Observation time.
    pub timestamp: DateTime<Utc>,

    /// Tags in insertion order.
    pub tags: Tags,

    /// Field values in insertion order. A measurement without values is
    /// rejected by the sink as malformed.
    pub values: Vec<MeasuredValue>,
}

impl Measurement {
    /// Create a measurement with `Good` quality and no tags or values.
    pub fn new(device: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device: device.into(),
            quality: Quality::Good,
            timestamp,
            tags: Tags::new(),
            values: Vec::new(),
        }
    }

    /// Create a measurement stamped with the current time.
    pub fn now(device: impl Into<String>) -> Self {
        Self::new(device, Utc::now())
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add_value(name, value);
        self
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key, value);
    }

    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.push(MeasuredValue::new(name, value));
    }

    /// Check whether a field with this name exists.
    pub fn contains_value(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }

    /// First field value with this name.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.value)
    }

    /// Copy of this measurement with the timestamp cut to `resolution`.
    pub fn truncated(&self, resolution: TimeResolution) -> Self {
        let mut m = self.clone();
        m.timestamp = resolution.truncate(m.timestamp);
        m
    }

    /// Encode as a single line (no trailing newline).
    pub fn to_line_protocol(&self, resolution: TimeResolution) -> String {
        line_protocol::encode(self, resolution)
    }

    /// Decode a single line.
    pub fn from_line_protocol(line: &str) -> Result<Self, DecodeError> {
        line_protocol::decode(line)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({} values)",
            self.device,
            self.timestamp.to_rfc3339(),
            self.values.len()
        )
    }
}
