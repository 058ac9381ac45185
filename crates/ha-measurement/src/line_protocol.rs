// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line protocol codec.
//!
//! The same text is sent to the sink and stored as the overflow payload, so
//! `decode` must accept everything `encode` produces.
//!
//! Escaping rules:
//! - device, tag keys, tag values and field names backslash-escape `=`,
//!   space and `,`
//! - string field values are double quoted with `"` escaped as `\"`
//! - a backslash in front of any other character is kept literally
//!
//! A backslash at the very end of a name, tag or string value cannot be
//! expressed: it escapes the delimiter written after it, and the line
//! decodes to a different measurement or not at all. [`encode`] does not
//! check for this. [`validate`] does, together with the other conditions a
//! line must meet to decode back to the same measurement (finite floats,
//! non-empty names, timestamp in range).

use crate::measurement::{FieldValue, MeasuredValue, Measurement, Quality, Tags};
use crate::resolution::TimeResolution;
use thiserror::Error;

/// Name of the reserved tag carrying [`Quality`].
pub const QUALITY_TAG: &str = "Quality";

/// Characters escaped in names and tag values.
const ESCAPED: [u8; 3] = [b'=', b' ', b','];

/// Errors returned when a line cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("device name is empty")]
    EmptyDevice,

    #[error("line ends before the field set")]
    Truncated,

    #[error("malformed tag: {0}")]
    InvalidTag(String),

    #[error("malformed field: {0}")]
    InvalidField(String),

    #[error("unterminated string value: {0}")]
    UnterminatedString(String),

    #[error("not a number: {0}")]
    NotANumber(String),

    #[error("not a boolean: {0}")]
    NotABoolean(String),

    #[error("unknown quality: {0}")]
    UnknownQuality(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown time resolution: {0}")]
    UnknownResolution(String),
}

/// Reasons a measurement cannot be written as a line that decodes back to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("device name is empty")]
    EmptyDevice,

    #[error("field name is empty")]
    EmptyFieldName,

    #[error("field {0} is not a finite number")]
    NonFiniteFloat(String),

    #[error("trailing backslash in {0:?}")]
    TrailingBackslash(String),

    #[error("timestamp {0} is out of range at {1} resolution")]
    TimestampOutOfRange(String, TimeResolution),
}

/// Check that `encode(m, resolution)` decodes back to `m.truncated(resolution)`,
/// less the tags `encode` skips.
pub fn validate(m: &Measurement, resolution: TimeResolution) -> Result<(), EncodeError> {
    if m.device.is_empty() {
        return Err(EncodeError::EmptyDevice);
    }
    check_trailing_backslash(&m.device)?;

    for (key, value) in m.tags.iter().filter(|(k, v)| is_written_tag(k, v)) {
        check_trailing_backslash(key)?;
        check_trailing_backslash(value)?;
    }

    for value in &m.values {
        if value.name.is_empty() {
            return Err(EncodeError::EmptyFieldName);
        }
        check_trailing_backslash(&value.name)?;
        match &value.value {
            FieldValue::Float(v) if !v.is_finite() => {
                return Err(EncodeError::NonFiniteFloat(value.name.clone()));
            }
            FieldValue::String(text) => check_trailing_backslash(text)?,
            _ => {}
        }
    }

    let epoch = resolution.epoch(&m.timestamp);
    let in_range = epoch >= 0
        && resolution.format_epoch(&m.timestamp).len() == resolution.digits()
        && resolution.from_epoch(epoch) == Some(resolution.truncate(m.timestamp));
    if !in_range {
        return Err(EncodeError::TimestampOutOfRange(
            m.timestamp.to_rfc3339(),
            resolution,
        ));
    }

    Ok(())
}

fn check_trailing_backslash(text: &str) -> Result<(), EncodeError> {
    if text.ends_with('\\') {
        return Err(EncodeError::TrailingBackslash(text.to_string()));
    }
    Ok(())
}

/// Empty tags and a user tag named `Quality` are never written.
fn is_written_tag(key: &str, value: &str) -> bool {
    !key.is_empty() && !value.is_empty() && key != QUALITY_TAG
}

/// Encode a measurement as a single line (no trailing newline).
///
/// Tags with an empty key or value are skipped, as is a user tag named
/// `Quality`; the measurement quality is always written last in the tag set.
pub fn encode(m: &Measurement, resolution: TimeResolution) -> String {
    let mut line = String::with_capacity(64 + m.values.len() * 16);

    line.push_str(&escape(&m.device));

    for (key, value) in m.tags.iter() {
        if !is_written_tag(key, value) {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&escape(value));
    }

    line.push(',');
    line.push_str(QUALITY_TAG);
    line.push('=');
    line.push_str(m.quality.as_str());

    let mut delimiter = ' ';
    for value in &m.values {
        line.push(delimiter);
        line.push_str(&escape(&value.name));
        line.push('=');
        line.push_str(&value.value.to_line_protocol());
        delimiter = ',';
    }

    line.push(' ');
    line.push_str(&resolution.format_epoch(&m.timestamp));
    line
}

/// Encode several measurements, one per line.
pub fn encode_batch(measurements: &[Measurement], resolution: TimeResolution) -> String {
    measurements
        .iter()
        .map(|m| encode(m, resolution))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode a single line.
///
/// The timestamp resolution is taken from the digit count of the trailing
/// epoch value. A missing `Quality` tag yields [`Quality::Good`].
pub fn decode(line: &str) -> Result<Measurement, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let series_end = find_unescaped(line, 0, b' ').ok_or(DecodeError::Truncated)?;
    let (device, quality, tags) = decode_series(&line[..series_end])?;

    let rest = &line[series_end + 1..];
    let (fields, epoch) = match rest.rsplit_once(' ') {
        Some((fields, epoch)) => (Some(fields), epoch),
        None => (None, rest),
    };

    let values = match fields {
        Some(fields) => decode_fields(fields)?,
        None => Vec::new(),
    };
    let timestamp = decode_timestamp(epoch)?;

    Ok(Measurement {
        device,
        quality,
        timestamp,
        tags,
        values,
    })
}

fn decode_series(series: &str) -> Result<(String, Quality, Tags), DecodeError> {
    let mut parts = split_unescaped(series, b',').into_iter();

    let device = unescape(parts.next().unwrap_or_default());
    if device.is_empty() {
        return Err(DecodeError::EmptyDevice);
    }

    let mut quality = Quality::Good;
    let mut tags = Tags::new();
    for part in parts {
        let eq = find_unescaped(part, 0, b'=')
            .ok_or_else(|| DecodeError::InvalidTag(part.to_string()))?;
        let key = unescape(&part[..eq]);
        if key.is_empty() {
            return Err(DecodeError::InvalidTag(part.to_string()));
        }
        let value = unescape(&part[eq + 1..]);
        if key == QUALITY_TAG {
            quality = value.parse()?;
        } else {
            tags.insert(key, value);
        }
    }

    Ok((device, quality, tags))
}

fn decode_fields(fields: &str) -> Result<Vec<MeasuredValue>, DecodeError> {
    let bytes = fields.as_bytes();
    let mut values = Vec::new();
    let mut pos = 0;

    loop {
        let eq = find_unescaped(fields, pos, b'=')
            .ok_or_else(|| DecodeError::InvalidField(fields[pos..].to_string()))?;
        let name = unescape(&fields[pos..eq]);
        if name.is_empty() {
            return Err(DecodeError::InvalidField(fields[pos..].to_string()));
        }

        let start = eq + 1;
        let (value, end) = if bytes.get(start) == Some(&b'"') {
            let close = find_closing_quote(bytes, start + 1)
                .ok_or_else(|| DecodeError::UnterminatedString(fields[pos..].to_string()))?;
            let raw = &fields[start + 1..close];
            (FieldValue::String(raw.replace("\\\"", "\"")), close + 1)
        } else {
            let end = fields[start..]
                .find(',')
                .map_or(fields.len(), |offset| start + offset);
            (parse_scalar(&fields[start..end])?, end)
        };
        values.push(MeasuredValue { name, value });

        match bytes.get(end) {
            None => break,
            Some(b',') => pos = end + 1,
            Some(_) => return Err(DecodeError::InvalidField(fields[pos..].to_string())),
        }
    }

    Ok(values)
}

fn parse_scalar(raw: &str) -> Result<FieldValue, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::InvalidField(raw.to_string()));
    }

    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| DecodeError::NotANumber(raw.to_string()));
    }

    if raw.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return match raw {
            "t" | "T" | "true" | "True" | "TRUE" => Ok(FieldValue::Boolean(true)),
            "f" | "F" | "false" | "False" | "FALSE" => Ok(FieldValue::Boolean(false)),
            _ => Err(DecodeError::NotABoolean(raw.to_string())),
        };
    }

    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(FieldValue::Float(v)),
        _ => Err(DecodeError::NotANumber(raw.to_string())),
    }
}

fn decode_timestamp(epoch: &str) -> Result<chrono::DateTime<chrono::Utc>, DecodeError> {
    let invalid = || DecodeError::InvalidTimestamp(epoch.to_string());

    if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let resolution = TimeResolution::from_digit_count(epoch.len()).ok_or_else(invalid)?;
    let value = epoch.parse::<i64>().map_err(|_| invalid())?;
    resolution.from_epoch(value).ok_or_else(invalid)
}

fn escape(s: &str) -> String {
    s.replace('=', "\\=")
        .replace(' ', "\\ ")
        .replace(',', "\\,")
}

fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1).is_some_and(|b| ESCAPED.contains(b)) {
            out.push_str(&s[last..i]);
            last = i + 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    out.push_str(&s[last..]);
    out
}

/// Position of the first `target` at or after `from` that is not part of an
/// escape sequence.
fn find_unescaped(s: &str, from: usize, target: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1).is_some_and(|b| ESCAPED.contains(b)) => i += 2,
            b if b == target => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn split_unescaped(s: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = find_unescaped(s, start, separator) {
        parts.push(&s[start..pos]);
        start = pos + 1;
    }
    parts.push(&s[start..]);
    parts
}

fn find_closing_quote(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'"') => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}
