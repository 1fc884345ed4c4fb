// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of a [`WireLogRecord`] into a [`StorageLogRow`].
//!
//! Conversion is pure: the same payload always produces the same row or the
//! same error. What happens to malformed input is decided by
//! [`CoercionPolicy`]:
//!
//! - [`CoercionPolicy::ZeroFill`] tolerates upstream noise. A numeric field
//!   or timestamp that fails to parse becomes the zero value.
//! - [`CoercionPolicy::Strict`] reports each of those as a [`ConversionError`].
//!
//! An undecodable payload and a request line that does not split into exactly
//! three tokens are errors under both policies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};

use crate::errors::ConversionError;
use crate::record::{StorageLogRow, WireLogRecord};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How malformed decode and numeric input is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoercionPolicy {
    #[default]
    ZeroFill,
    Strict,
}

impl FromStr for CoercionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zero-fill" | "zero_fill" | "zerofill" | "lenient" => Ok(Self::ZeroFill),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown coercion policy '{other}'")),
        }
    }
}

impl fmt::Display for CoercionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroFill => write!(f, "zero-fill"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Time zone used to render the row timestamp.
///
/// `Local` follows the zone of the host process, so the same record renders
/// differently on hosts configured differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampZone {
    #[default]
    Local,
    Utc,
}

impl FromStr for TimestampZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" => Ok(Self::Utc),
            other => Err(format!("unknown timezone '{other}'")),
        }
    }
}

impl fmt::Display for TimestampZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Utc => write!(f, "utc"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Converter {
    pub policy: CoercionPolicy,
    pub time_zone: TimestampZone,
}

impl Converter {
    #[must_use]
    pub fn new(policy: CoercionPolicy, time_zone: TimestampZone) -> Self {
        Self { policy, time_zone }
    }

    /// Decodes and converts one datagram payload. A payload that does not
    /// decode is [`ConversionError::Decode`] under both policies.
    pub fn convert_payload(&self, payload: &str) -> Result<StorageLogRow, ConversionError> {
        let record = WireLogRecord::from_json(payload)
            .map_err(|e| ConversionError::Decode(e.to_string()))?;
        self.convert(record)
    }

    pub fn convert(&self, record: WireLogRecord) -> Result<StorageLogRow, ConversionError> {
        let (method, uri, http_version) = split_request_line(&record.request_line)?;

        Ok(StorageLogRow {
            timestamp: self.format_timestamp(record.timestamp)?,
            remote_addr: record.remote_addr,
            remote_user: record.remote_user,
            method,
            uri,
            http_version,
            status: self.coerce("status", &record.status)?,
            body_bytes_sent: self.coerce("body_bytes_sent", &record.body_bytes_sent)?,
            referer: record.referer,
            user_agent: record.user_agent,
            request_time: self.coerce("request_time", &record.request_time)?,
            upstream_response_time: self
                .coerce("upstream_response_time", &record.upstream_response_time)?,
            request_length: self.coerce("request_length", &record.request_length)?,
            bytes_sent: self.coerce("bytes_sent", &record.bytes_sent)?,
            x_forwarded_for: record.x_forwarded_for,
            x_real_ip: record.x_real_ip,
            scheme: record.scheme,
            host: record.host,
            server_name: record.server_name,
        })
    }

    // nginx writes "-" for variables without a value, e.g. upstream_response_time
    // when no upstream was contacted. That is absence, not a malformed number.
    fn coerce<T>(&self, field: &'static str, value: &str) -> Result<T, ConversionError>
    where
        T: FromStr + Default,
    {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "-" {
            return Ok(T::default());
        }
        match trimmed.parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => match self.policy {
                CoercionPolicy::ZeroFill => Ok(T::default()),
                CoercionPolicy::Strict => Err(ConversionError::InvalidNumber {
                    field,
                    value: value.to_string(),
                }),
            },
        }
    }

    fn format_timestamp(&self, seconds: f64) -> Result<String, ConversionError> {
        let utc = match whole_seconds(seconds).and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)) {
            Some(utc) => utc,
            None => match self.policy {
                CoercionPolicy::ZeroFill => DateTime::<Utc>::default(),
                CoercionPolicy::Strict => return Err(ConversionError::InvalidTimestamp(seconds)),
            },
        };
        Ok(match self.time_zone {
            TimestampZone::Utc => utc.format(TIMESTAMP_FORMAT).to_string(),
            TimestampZone::Local => utc.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

// Truncates toward zero; the fractional part is discarded.
fn whole_seconds(seconds: f64) -> Option<i64> {
    if !seconds.is_finite() {
        return None;
    }
    let truncated = seconds.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

fn split_request_line(line: &str) -> Result<(String, String, String), ConversionError> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(uri), Some(version), None) => {
            Ok((method.to_string(), uri.to_string(), version.to_string()))
        }
        _ => Err(ConversionError::MalformedRequestLine {
            tokens: line.split_whitespace().count(),
        }),
    }
}
