// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire and storage representations of one nginx access-log record.
//!
//! The wire form mirrors what nginx emits with `log_format ... escape=json`:
//! most numeric variables arrive quoted, so they are carried as text and only
//! coerced by [`crate::converter::Converter`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A log record exactly as decoded from a datagram payload.
///
/// Every field is optional on the wire; missing keys decode to the zero value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WireLogRecord {
    /// Seconds since the Unix epoch, fractional part allowed.
    #[serde(rename = "date", deserialize_with = "loose_seconds")]
    pub timestamp: f64,
    #[serde(deserialize_with = "loose_text")]
    pub remote_addr: String,
    #[serde(deserialize_with = "loose_text")]
    pub remote_user: String,
    /// `METHOD URI VERSION`, space separated.
    #[serde(rename = "request", deserialize_with = "loose_text")]
    pub request_line: String,
    #[serde(deserialize_with = "loose_text")]
    pub status: String,
    #[serde(deserialize_with = "loose_text")]
    pub body_bytes_sent: String,
    #[serde(rename = "http_referer", deserialize_with = "loose_text")]
    pub referer: String,
    #[serde(rename = "http_user_agent", deserialize_with = "loose_text")]
    pub user_agent: String,
    #[serde(deserialize_with = "loose_text")]
    pub request_time: String,
    #[serde(deserialize_with = "loose_text")]
    pub upstream_response_time: String,
    #[serde(deserialize_with = "loose_text")]
    pub request_length: String,
    #[serde(deserialize_with = "loose_text")]
    pub bytes_sent: String,
    #[serde(rename = "http_x_forwarded_for", deserialize_with = "loose_text")]
    pub x_forwarded_for: String,
    #[serde(rename = "http_x_real_ip", deserialize_with = "loose_text")]
    pub x_real_ip: String,
    #[serde(deserialize_with = "loose_text")]
    pub scheme: String,
    #[serde(rename = "http_host", deserialize_with = "loose_text")]
    pub host: String,
    #[serde(deserialize_with = "loose_text")]
    pub server_name: String,
}

impl WireLogRecord {
    /// Decodes one JSON object.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// A normalized row, serialized with the column names of the
/// `nginx_access_logs` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageLogRow {
    /// `YYYY-MM-DD HH:MM:SS`, second resolution.
    #[serde(rename = "time_iso8601")]
    pub timestamp: String,
    pub remote_addr: String,
    pub remote_user: String,
    pub method: String,
    #[serde(rename = "request_uri")]
    pub uri: String,
    pub http_version: String,
    pub status: i32,
    pub body_bytes_sent: i64,
    #[serde(rename = "http_referer")]
    pub referer: String,
    #[serde(rename = "http_user_agent")]
    pub user_agent: String,
    pub request_time: f64,
    pub upstream_response_time: f64,
    pub request_length: i64,
    pub bytes_sent: i64,
    #[serde(rename = "http_x_forwarded_for")]
    pub x_forwarded_for: String,
    #[serde(rename = "http_x_real_ip")]
    pub x_real_ip: String,
    pub scheme: String,
    #[serde(rename = "http_host")]
    pub host: String,
    pub server_name: String,
}

// Accepts a string, a bare number or null. Upstream configs differ on whether
// numeric variables are quoted.
fn loose_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// Non-numeric text becomes NaN so the converter can apply its policy to it.
fn loose_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Null => 0.0,
        _ => f64::NAN,
    })
}
