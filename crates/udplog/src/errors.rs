// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the ingestion path.
//!
//! None of these unwind past a task or the receive loop. They are logged and
//! counted where they occur; only [`ReceiverError::Bind`] and [`ConfigError`]
//! are meant to stop the process, and only at startup.

/// Failure to turn one datagram payload into a storage row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// The payload is not a JSON object with the expected shape (strict policy only).
    #[error("payload is not a valid log record: {0}")]
    Decode(String),

    /// The request line did not split into `METHOD URI VERSION`.
    #[error("request line has {tokens} whitespace-separated tokens, expected 3")]
    MalformedRequestLine { tokens: usize },

    /// A text-encoded numeric field failed to parse (strict policy only).
    #[error("field `{field}` is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// The timestamp cannot be represented as a calendar datetime (strict policy only).
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(f64),
}

/// Rejection returned by [`crate::worker_pool::WorkerPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("task queue is full")]
    QueueFull,

    #[error("worker pool is shut down")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    #[error("worker pool must be created inside a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("couldn't bind UDP socket to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to build sink client: {0}")]
    Client(String),

    #[error("failed to serialize row: {0}")]
    Serialize(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink rejected row with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
