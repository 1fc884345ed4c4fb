// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP receiver for access-log datagrams.
//!
//! The receiver owns the socket and one reusable buffer. For every datagram it
//! copies the received bytes into an owned string and trims it. It then hands
//! the string to the [`WorkerPool`] and goes straight back to the socket. No
//! parsing happens here. When the pool is saturated the datagram is dropped and
//! logged. The receive loop never blocks on the pool.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{BUFFER_SIZE, DEFAULT_HOST, DEFAULT_PORT};
use crate::errors::{ReceiverError, SubmitError};
use crate::ingest::Ingestor;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Host to bind the UDP socket to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind the UDP socket to; 0 picks an ephemeral port
    pub port: u16,
    /// Size of the receive buffer; longer datagrams are truncated
    pub buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buffer_size: BUFFER_SIZE,
        }
    }
}

// BufferReader abstracts where datagrams come from.
enum BufferReader {
    UdpSocket(tokio::net::UdpSocket),

    /// Mirror reader for testing - replays a fixed datagram
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),
}

impl BufferReader {
    /// Reads one datagram into `buf`. Blocks until a datagram arrives.
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => socket.recv_from(buf).await,
            BufferReader::MirrorTest(data, source) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, *source))
            }
        }
    }
}

pub struct LogReceiver {
    cancel_token: CancellationToken,
    pool: Arc<WorkerPool>,
    ingestor: Ingestor,
    buffer_reader: BufferReader,
    buf: Vec<u8>,
    local_addr: Option<SocketAddr>,
}

impl LogReceiver {
    /// Binds the UDP socket. A bind failure is returned to the caller and is
    /// not retried.
    pub async fn new(
        config: &ReceiverConfig,
        pool: Arc<WorkerPool>,
        ingestor: Ingestor,
        cancel_token: CancellationToken,
    ) -> Result<LogReceiver, ReceiverError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = match tokio::net::UdpSocket::bind(&addr).await {
            Ok(socket) => socket,
            Err(source) => return Err(ReceiverError::Bind { addr, source }),
        };
        let local_addr = socket.local_addr().map_err(ReceiverError::LocalAddr)?;

        Ok(LogReceiver {
            cancel_token,
            pool,
            ingestor,
            buffer_reader: BufferReader::UdpSocket(socket),
            buf: vec![0; config.buffer_size],
            local_addr: Some(local_addr),
        })
    }

    /// The address the socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Receives until the cancellation token fires.
    pub async fn spin(mut self) {
        if let Some(addr) = self.local_addr {
            info!("Listening for access logs on udp://{addr}");
        }
        let cancel_token = self.cancel_token.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = self.consume_datagram() => {}
            }
        }
        info!("Access log receiver stopped");
    }

    /// Reads one datagram and submits it to the pool.
    pub async fn consume_datagram(&mut self) {
        let (len, source) = match self.buffer_reader.read(&mut self.buf).await {
            Ok(received) => received,
            Err(e) => {
                self.ingestor.stats().record_read_error();
                error!("Failed to read datagram: {e}");
                return;
            }
        };
        self.ingestor.stats().record_received();
        if len == self.buf.len() {
            debug!("Datagram from {source} filled the {len} byte buffer and may be truncated");
        }

        let payload = String::from_utf8_lossy(&self.buf[..len]);
        let payload = payload.trim();
        if payload.is_empty() {
            self.ingestor.stats().record_empty_skipped();
            trace!("Skipping empty datagram from {source}");
            return;
        }
        let payload = payload.to_string();

        let ingestor = self.ingestor.clone();
        match self
            .pool
            .submit(async move { ingestor.ingest(payload, source).await })
        {
            Ok(()) => {
                self.ingestor.stats().record_submitted();
                trace!("Submitted {len} byte datagram from {source}");
            }
            Err(SubmitError::QueueFull) => {
                self.ingestor.stats().record_dropped_overload();
                warn!("Worker pool is full, dropping datagram from {source}");
            }
            Err(SubmitError::Closed) => {
                self.ingestor.stats().record_dropped_overload();
                warn!("Worker pool is shut down, dropping datagram from {source}");
            }
        }
    }
}
