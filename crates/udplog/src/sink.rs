// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for converted rows.
//!
//! A sink is called once per converted row from inside a worker task. A
//! failure is logged and counted by the caller and the row is dropped. Sinks
//! do not retry or buffer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::SinkError;
use crate::record::StorageLogRow;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, row: StorageLogRow) -> Result<(), SinkError>;

    /// Short name used in startup logs.
    fn name(&self) -> &'static str;
}

/// Emits each row as a structured log event. Used when no storage backend is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn write(&self, row: StorageLogRow) -> Result<(), SinkError> {
        info!(
            time = %row.timestamp,
            remote_addr = %row.remote_addr,
            remote_user = %row.remote_user,
            method = %row.method,
            uri = %row.uri,
            http_version = %row.http_version,
            status = row.status,
            body_bytes_sent = row.body_bytes_sent,
            referer = %row.referer,
            user_agent = %row.user_agent,
            request_time = row.request_time,
            upstream_response_time = row.upstream_response_time,
            request_length = row.request_length,
            bytes_sent = row.bytes_sent,
            x_forwarded_for = %row.x_forwarded_for,
            x_real_ip = %row.x_real_ip,
            scheme = %row.scheme,
            host = %row.host,
            server_name = %row.server_name,
            "access log"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Forwards rows into a channel, for embedding the ingestion path in another
/// process.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StorageLogRow>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StorageLogRow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&self, row: StorageLogRow) -> Result<(), SinkError> {
        self.tx.send(row).map_err(|_| SinkError::Closed)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_channel_sink_forwards_rows() {
        let (sink, mut rx) = ChannelSink::new();
        let row = StorageLogRow {
            method: "GET".to_string(),
            ..Default::default()
        };

        sink.write(row.clone()).await.expect("write should succeed");
        assert_eq!(rx.recv().await, Some(row));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);

        let result = sink.write(StorageLogRow::default()).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_sink_emits_every_column() {
        let row = StorageLogRow {
            timestamp: "2025-07-01 12:17:20".to_string(),
            remote_addr: "172.28.0.1".to_string(),
            remote_user: "alice".to_string(),
            method: "DELETE".to_string(),
            uri: "/items/7".to_string(),
            http_version: "HTTP/2.0".to_string(),
            status: 204,
            body_bytes_sent: 17,
            referer: "https://example.test/".to_string(),
            user_agent: "curl/8.5.0".to_string(),
            request_time: 0.25,
            upstream_response_time: 0.125,
            request_length: 321,
            bytes_sent: 654,
            x_forwarded_for: "10.1.2.3".to_string(),
            x_real_ip: "10.9.8.7".to_string(),
            scheme: "https".to_string(),
            host: "api.example.test".to_string(),
            server_name: "edge-1".to_string(),
        };

        LogSink.write(row).await.expect("log sink never fails");
        assert!(logs_contain("access log"));
        for field in [
            "time=2025-07-01 12:17:20",
            "remote_addr=172.28.0.1",
            "remote_user=alice",
            "method=DELETE",
            "uri=/items/7",
            "http_version=HTTP/2.0",
            "status=204",
            "body_bytes_sent=17",
            "referer=https://example.test/",
            "user_agent=curl/8.5.0",
            "request_time=0.25",
            "upstream_response_time=0.125",
            "request_length=321",
            "bytes_sent=654",
            "x_forwarded_for=10.1.2.3",
            "x_real_ip=10.9.8.7",
            "scheme=https",
            "host=api.example.test",
            "server_name=edge-1",
        ] {
            assert!(logs_contain(field), "missing {field}");
        }
    }
}
