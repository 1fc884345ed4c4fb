// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of work submitted to the pool for each datagram: decode, convert,
//! write to the sink.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::converter::Converter;
use crate::errors::ConversionError;
use crate::sink::Sink;
use crate::stats::IngestStats;

/// Everything a task needs, cheap to clone into each submitted closure.
#[derive(Clone)]
pub struct Ingestor {
    converter: Converter,
    sink: Arc<dyn Sink>,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    #[must_use]
    pub fn new(converter: Converter, sink: Arc<dyn Sink>, stats: Arc<IngestStats>) -> Self {
        Self {
            converter,
            sink,
            stats,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Processes one trimmed, non-empty payload. `source` is only used in log
    /// lines.
    pub async fn ingest(&self, payload: String, source: SocketAddr) {
        let row = match self.converter.convert_payload(&payload) {
            Ok(row) => row,
            Err(e) => {
                self.record_conversion_failure(&e);
                warn!("Dropping record from {source}: {e}");
                debug!("Rejected payload from {source}: {payload}");
                return;
            }
        };

        debug!(
            "Converted record from {}: {} {} {}",
            source, row.method, row.uri, row.status
        );
        match self.sink.write(row).await {
            Ok(()) => self.stats.record_row_written(),
            Err(e) => {
                self.stats.record_sink_failure();
                error!("Failed to write record from {source} to {} sink: {e}", self.sink.name());
            }
        }
    }

    fn record_conversion_failure(&self, error: &ConversionError) {
        match error {
            ConversionError::Decode(_) => self.stats.record_decode_failure(),
            ConversionError::MalformedRequestLine { .. } => {
                self.stats.record_structural_failure();
            }
            ConversionError::InvalidNumber { .. } | ConversionError::InvalidTimestamp(_) => {
                self.stats.record_coercion_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{CoercionPolicy, TimestampZone};
    use crate::errors::SinkError;
    use crate::record::StorageLogRow;
    use crate::sink::ChannelSink;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use tracing_test::traced_test;

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn write(&self, _row: StorageLogRow) -> Result<(), SinkError> {
            Err(SinkError::Transport("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn source() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(172, 28, 0, 1)), 40000)
    }

    fn ingestor(sink: Arc<dyn Sink>, policy: CoercionPolicy) -> Ingestor {
        Ingestor::new(
            Converter::new(policy, TimestampZone::Utc),
            sink,
            Arc::new(IngestStats::default()),
        )
    }

    #[tokio::test]
    async fn test_valid_payload_reaches_sink() {
        let (sink, mut rx) = ChannelSink::new();
        let ingestor = ingestor(Arc::new(sink), CoercionPolicy::ZeroFill);

        ingestor
            .ingest(
                r#"{"date":1751372240,"request":"GET /a HTTP/1.1","status":"301"}"#.to_string(),
                source(),
            )
            .await;

        let row = rx.recv().await.expect("row should be forwarded");
        assert_eq!(row.uri, "/a");
        assert_eq!(row.status, 301);
        assert_eq!(ingestor.stats().snapshot().rows_written, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failures_are_counted_by_kind() {
        let (sink, mut rx) = ChannelSink::new();
        let ingestor = ingestor(Arc::new(sink), CoercionPolicy::Strict);

        ingestor.ingest("{oops".to_string(), source()).await;
        ingestor
            .ingest(r#"{"request":"GET /x"}"#.to_string(), source())
            .await;
        ingestor
            .ingest(
                r#"{"request":"GET /x HTTP/1.1","status":"abc"}"#.to_string(),
                source(),
            )
            .await;

        let snapshot = ingestor.stats().snapshot();
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.structural_failures, 1);
        assert_eq!(snapshot.coercion_failures, 1);
        assert_eq!(snapshot.rows_written, 0);
        assert!(rx.try_recv().is_err());
        assert!(logs_contain("Dropping record from 172.28.0.1:40000"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sink_failure_is_logged_and_counted() {
        let ingestor = ingestor(Arc::new(FailingSink), CoercionPolicy::ZeroFill);

        ingestor
            .ingest(r#"{"request":"GET / HTTP/1.1"}"#.to_string(), source())
            .await;

        let snapshot = ingestor.stats().snapshot();
        assert_eq!(snapshot.sink_failures, 1);
        assert_eq!(snapshot.rows_written, 0);
        assert!(logs_contain("to failing sink: transport error: connection refused"));
    }
}
