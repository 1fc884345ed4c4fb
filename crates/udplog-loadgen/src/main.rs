// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Sends sample access-log datagrams at a udplog server.
//!
//! Three modes, picked with `UDPLOG_MODE`:
//!
//! - `throughput` (default): a fixed number of messages split across
//!   concurrent senders.
//! - `benchmark`: one sender, a warm-up burst, then sends for a fixed duration.
//! - `smoke`: a handful of records, one per second, including a malformed one.

use std::env;
use std::fmt::{self, Write as _};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_TARGET: &str = "127.0.0.1:9001";
const DEFAULT_MESSAGES: u64 = 10_000;
const DEFAULT_CONCURRENCY: u64 = 100;
const DEFAULT_SEND_INTERVAL_US: u64 = 100;
const DEFAULT_DURATION_SECS: u64 = 30;
const DEFAULT_WARMUP_MESSAGES: u64 = 1_000;

/// Pause after the warm-up burst before measuring.
const WARMUP_SETTLE: Duration = Duration::from_secs(1);
const SMOKE_PAUSE: Duration = Duration::from_secs(1);

/// Room for the sample record plus the longest generated URI.
const PAYLOAD_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LoadMode {
    #[default]
    Throughput,
    Benchmark,
    Smoke,
}

impl FromStr for LoadMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "throughput" => Ok(Self::Throughput),
            "benchmark" | "bench" => Ok(Self::Benchmark),
            "smoke" | "simple" => Ok(Self::Smoke),
            other => bail!("unknown mode '{other}', expected throughput, benchmark or smoke"),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Throughput => write!(f, "throughput"),
            Self::Benchmark => write!(f, "benchmark"),
            Self::Smoke => write!(f, "smoke"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LoadConfig {
    mode: LoadMode,
    target: SocketAddr,
    messages: u64,
    concurrency: u64,
    send_interval: Duration,
    duration: Duration,
    warmup_messages: u64,
}

impl LoadConfig {
    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("UDPLOG_MODE").filter(|value| !value.trim().is_empty()) {
            Some(value) => value.parse()?,
            None => LoadMode::default(),
        };
        let config = Self {
            mode,
            target: parse(&lookup, "UDPLOG_TARGET")?
                .map_or_else(|| SocketAddr::from_str(DEFAULT_TARGET), Ok)?,
            messages: parse(&lookup, "UDPLOG_MESSAGES")?.unwrap_or(DEFAULT_MESSAGES),
            concurrency: parse(&lookup, "UDPLOG_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY),
            send_interval: Duration::from_micros(
                parse(&lookup, "UDPLOG_SEND_INTERVAL_US")?.unwrap_or(DEFAULT_SEND_INTERVAL_US),
            ),
            duration: Duration::from_secs(
                parse(&lookup, "UDPLOG_DURATION_SECS")?.unwrap_or(DEFAULT_DURATION_SECS),
            ),
            warmup_messages: parse(&lookup, "UDPLOG_WARMUP_MESSAGES")?
                .unwrap_or(DEFAULT_WARMUP_MESSAGES),
        };
        if config.concurrency == 0 {
            bail!("UDPLOG_CONCURRENCY must be greater than 0");
        }
        if config.mode == LoadMode::Benchmark && config.duration.is_zero() {
            bail!("UDPLOG_DURATION_SECS must be greater than 0");
        }
        Ok(config)
    }

    /// Messages assigned to `sender`. The remainder goes to the first senders.
    fn share(&self, sender: u64) -> u64 {
        let base = self.messages / self.concurrency;
        let extra = u64::from(sender < self.messages % self.concurrency);
        base + extra
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: {value:?}")),
        None => Ok(None),
    }
}

/// Writes one sample record with the request URI `/<prefix>/<sender>/<seq>`
/// into `buf`.
fn write_payload(buf: &mut String, prefix: &str, sender: u64, seq: u64, unix_seconds: f64) {
    buf.clear();
    // Writing into a String cannot fail.
    let _ = write!(
        buf,
        concat!(
            r#"{{"date":{:.3},"remote_addr":"172.28.0.1","remote_user":"-","#,
            r#""request":"GET /{}/{}/{} HTTP/1.1","status":"200","body_bytes_sent":"154","#,
            r#""http_referer":"-","http_user_agent":"udplog-loadgen/0.1","request_time":"0.071","#,
            r#""upstream_response_time":"0.071","request_length":"201","bytes_sent":"553","#,
            r#""http_x_forwarded_for":"-","http_x_real_ip":"-","scheme":"http","#,
            r#""http_host":"localhost","server_name":"localhost"}}"#
        ),
        unix_seconds, prefix, sender, seq
    );
}

fn unix_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SenderReport {
    sent: u64,
    failed: u64,
}

impl SenderReport {
    fn merge(&mut self, other: SenderReport) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

/// Sends one payload and records the outcome.
async fn send_one(socket: &UdpSocket, target: SocketAddr, payload: &str, report: &mut SenderReport) {
    match socket.send_to(payload.as_bytes(), target).await {
        Ok(_) => report.sent += 1,
        Err(e) => {
            report.failed += 1;
            debug!("Send to {target} failed: {e}");
        }
    }
}

async fn pace(send_interval: Duration) {
    if !send_interval.is_zero() {
        tokio::time::sleep(send_interval).await;
    }
}

async fn run_sender(
    sender: u64,
    messages: u64,
    target: SocketAddr,
    send_interval: Duration,
) -> SenderReport {
    let mut report = SenderReport::default();
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Sender {sender}: unable to bind UDP socket: {e}");
            report.failed = messages;
            return report;
        }
    };

    let mut payload = String::with_capacity(PAYLOAD_CAPACITY);
    for seq in 0..messages {
        write_payload(&mut payload, "load", sender, seq, unix_seconds());
        send_one(&socket, target, &payload, &mut report).await;
        pace(send_interval).await;
    }
    report
}

async fn run_throughput(config: &LoadConfig) -> (SenderReport, Duration) {
    info!(
        "Sending {} messages to udp://{} from {} senders",
        config.messages, config.target, config.concurrency
    );

    let started = Instant::now();
    let mut senders = JoinSet::new();
    for sender in 0..config.concurrency {
        senders.spawn(run_sender(
            sender,
            config.share(sender),
            config.target,
            config.send_interval,
        ));
    }

    let mut total = SenderReport::default();
    while let Some(result) = senders.join_next().await {
        match result {
            Ok(report) => total.merge(report),
            Err(e) => error!("Sender task failed: {e}"),
        }
    }
    (total, started.elapsed())
}

/// Warm-up burst, then a single sender for `duration`. Only the measured phase
/// is reported.
async fn run_benchmark(
    target: SocketAddr,
    warmup_messages: u64,
    duration: Duration,
    send_interval: Duration,
) -> anyhow::Result<(SenderReport, Duration)> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding UDP socket")?;
    let mut payload = String::with_capacity(PAYLOAD_CAPACITY);

    if warmup_messages > 0 {
        info!("Warming up with {warmup_messages} messages");
        let mut warmup = SenderReport::default();
        for seq in 0..warmup_messages {
            write_payload(&mut payload, "warmup", 0, seq, unix_seconds());
            send_one(&socket, target, &payload, &mut warmup).await;
        }
        debug!("Warm-up done: {} sent, {} failed", warmup.sent, warmup.failed);
        tokio::time::sleep(WARMUP_SETTLE).await;
    }

    info!("Benchmarking udp://{target} for {duration:?}");
    let mut report = SenderReport::default();
    let started = Instant::now();
    let mut seq = 0;
    while started.elapsed() < duration {
        write_payload(&mut payload, "bench", 0, seq, unix_seconds());
        send_one(&socket, target, &payload, &mut report).await;
        seq += 1;
        pace(send_interval).await;
    }
    Ok((report, started.elapsed()))
}

/// A few records a person can watch arrive in the server log. The last one is
/// not JSON and should show up as a dropped record.
async fn run_smoke(target: SocketAddr, pause: Duration) -> anyhow::Result<(SenderReport, Duration)> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding UDP socket")?;
    let mut payload = String::with_capacity(PAYLOAD_CAPACITY);
    let mut report = SenderReport::default();
    let started = Instant::now();

    for seq in 0..3 {
        write_payload(&mut payload, "smoke", 0, seq, unix_seconds());
        info!("Sending smoke record {}: GET /smoke/0/{seq}", seq + 1);
        send_one(&socket, target, &payload, &mut report).await;
        tokio::time::sleep(pause).await;
    }
    info!("Sending smoke record 4: malformed payload");
    send_one(&socket, target, "Log message from udplog-loadgen", &mut report).await;

    Ok((report, started.elapsed()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .context("parsing log filter")?,
        )
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = LoadConfig::from_lookup(|key| env::var(key).ok())?;
    let (total, elapsed) = match config.mode {
        LoadMode::Throughput => run_throughput(&config).await,
        LoadMode::Benchmark => {
            run_benchmark(
                config.target,
                config.warmup_messages,
                config.duration,
                config.send_interval,
            )
            .await?
        }
        LoadMode::Smoke => run_smoke(config.target, SMOKE_PAUSE).await?,
    };

    let rate = if elapsed.is_zero() {
        0.0
    } else {
        total.sent as f64 / elapsed.as_secs_f64()
    };
    info!(
        "{} run: sent {} messages in {:?} ({:.0} msg/s), {} failed",
        config.mode, total.sent, elapsed, rate, total.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::time::timeout;

    fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<LoadConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LoadConfig::from_lookup(|key| vars.get(key).cloned())
    }

    async fn recv_text(socket: &UdpSocket) -> String {
        let mut buf = vec![0; PAYLOAD_CAPACITY];
        let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.mode, LoadMode::Throughput);
        assert_eq!(config.target, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.messages, 10_000);
        assert_eq!(config.concurrency, 100);
        assert_eq!(config.send_interval, Duration::from_micros(100));
        assert_eq!(config.duration, Duration::from_secs(30));
        assert_eq!(config.warmup_messages, 1_000);
    }

    #[test]
    fn test_mode_parsing() {
        let config = from_pairs(&[("UDPLOG_MODE", "Benchmark")]).unwrap();
        assert_eq!(config.mode, LoadMode::Benchmark);
        let config = from_pairs(&[("UDPLOG_MODE", "smoke")]).unwrap();
        assert_eq!(config.mode, LoadMode::Smoke);
        assert!(from_pairs(&[("UDPLOG_MODE", "stress")]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(from_pairs(&[("UDPLOG_TARGET", "localhost")]).is_err());
        assert!(from_pairs(&[("UDPLOG_MESSAGES", "lots")]).is_err());
        assert!(from_pairs(&[("UDPLOG_CONCURRENCY", "0")]).is_err());
        assert!(from_pairs(&[("UDPLOG_MODE", "benchmark"), ("UDPLOG_DURATION_SECS", "0")]).is_err());
    }

    #[test]
    fn test_messages_are_split_across_senders() {
        let config = from_pairs(&[("UDPLOG_MESSAGES", "10"), ("UDPLOG_CONCURRENCY", "4")]).unwrap();
        let shares: Vec<u64> = (0..4).map(|sender| config.share(sender)).collect();
        assert_eq!(shares, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_payload_is_valid_json_with_unique_uri() {
        let mut buf = String::with_capacity(PAYLOAD_CAPACITY);
        write_payload(&mut buf, "load", 7, 42, 1_751_372_240.0);

        let value: serde_json::Value = serde_json::from_str(&buf).unwrap();
        assert_eq!(value["request"], "GET /load/7/42 HTTP/1.1");
        assert_eq!(value["date"], 1_751_372_240.0);
        assert_eq!(value["status"], "200");
        assert!(buf.len() <= PAYLOAD_CAPACITY);

        let capacity = buf.capacity();
        write_payload(&mut buf, "load", 7, 43, 1_751_372_241.0);
        assert_eq!(buf.capacity(), capacity);
    }

    #[tokio::test]
    async fn test_benchmark_sends_until_duration_elapses() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();

        let (report, elapsed) = run_benchmark(
            target,
            0,
            Duration::from_millis(50),
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert!(elapsed >= Duration::from_millis(50));
        assert!(report.sent > 0);
        assert_eq!(report.failed, 0);
        let first: serde_json::Value = serde_json::from_str(&recv_text(&server).await).unwrap();
        assert_eq!(first["request"], "GET /bench/0/0 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_smoke_sends_three_records_and_one_malformed() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();

        let (report, _) = run_smoke(target, Duration::ZERO).await.unwrap();
        assert_eq!(report, SenderReport { sent: 4, failed: 0 });

        for seq in 0..3 {
            let value: serde_json::Value =
                serde_json::from_str(&recv_text(&server).await).unwrap();
            assert_eq!(value["request"], format!("GET /smoke/0/{seq} HTTP/1.1"));
        }
        assert!(serde_json::from_str::<serde_json::Value>(&recv_text(&server).await).is_err());
    }
}
