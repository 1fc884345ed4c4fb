// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use mockito::{Matcher, Server};
use tokio::{
    net::UdpSocket,
    sync::mpsc::UnboundedReceiver,
    time::{sleep, timeout, Duration},
};
use tokio_util::sync::CancellationToken;
use udplog::{
    clickhouse::{ClickHouseConfig, ClickHouseSink},
    converter::{CoercionPolicy, Converter, TimestampZone},
    ingest::Ingestor,
    receiver::{LogReceiver, ReceiverConfig},
    record::StorageLogRow,
    sink::{ChannelSink, Sink},
    stats::IngestStats,
    worker_pool::{WorkerPool, WorkerPoolConfig},
};

const SAMPLE: &str = r#"{"date":1751372240.0,"remote_addr":"172.28.0.1","remote_user":"-","request":"GET /hyperfApi/demo/test HTTP/1.1","status":"200","body_bytes_sent":"154","http_referer":"-","http_user_agent":"PostmanRuntime-ApipostRuntime/1.1.0","request_time":"0.071","upstream_response_time":"0.071","request_length":"201","bytes_sent":"553","http_x_forwarded_for":"-","http_x_real_ip":"-","scheme":"http","http_host":"localhost","server_name":"localhost"}"#;

struct Running {
    target: std::net::SocketAddr,
    pool: Arc<WorkerPool>,
    stats: Arc<IngestStats>,
    cancel_token: CancellationToken,
    receiver: tokio::task::JoinHandle<()>,
}

async fn start_receiver(sink: Arc<dyn Sink>) -> Running {
    let pool = Arc::new(
        WorkerPool::new(WorkerPoolConfig {
            worker_count: 4,
            queue_capacity: 64,
            task_timeout: Some(Duration::from_secs(5)),
        })
        .expect("failed to create worker pool"),
    );
    let stats = Arc::new(IngestStats::default());
    let ingestor = Ingestor::new(
        Converter::new(CoercionPolicy::ZeroFill, TimestampZone::Utc),
        sink,
        Arc::clone(&stats),
    );
    let cancel_token = CancellationToken::new();
    let receiver = LogReceiver::new(
        &ReceiverConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ReceiverConfig::default()
        },
        Arc::clone(&pool),
        ingestor,
        cancel_token.clone(),
    )
    .await
    .expect("failed to bind receiver");
    let target = receiver.local_addr().expect("receiver should be bound");

    Running {
        target,
        pool,
        stats,
        cancel_token,
        receiver: tokio::spawn(receiver.spin()),
    }
}

async fn send(target: std::net::SocketAddr, payload: &str) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    socket
        .send_to(payload.as_bytes(), target)
        .await
        .expect("unable to send datagram");
}

async fn stop(running: Running) {
    running.cancel_token.cancel();
    timeout(Duration::from_secs(5), running.receiver)
        .await
        .expect("receiver did not stop")
        .expect("receiver panicked");
    running.pool.shutdown().await;
}

async fn next_row(rows: &mut UnboundedReceiver<StorageLogRow>) -> StorageLogRow {
    timeout(Duration::from_secs(5), rows.recv())
        .await
        .expect("timed out waiting for row")
        .expect("sink channel closed")
}

#[tokio::test]
async fn sample_datagram_becomes_one_row() {
    let (sink, mut rows) = ChannelSink::new();
    let running = start_receiver(Arc::new(sink)).await;

    send(running.target, SAMPLE).await;
    let row = next_row(&mut rows).await;

    assert_eq!(row.timestamp, "2025-07-01 12:17:20");
    assert_eq!(row.remote_addr, "172.28.0.1");
    assert_eq!(row.method, "GET");
    assert_eq!(row.uri, "/hyperfApi/demo/test");
    assert_eq!(row.http_version, "HTTP/1.1");
    assert_eq!(row.status, 200);
    assert_eq!(row.body_bytes_sent, 154);
    assert_eq!(row.request_time, 0.071);
    assert_eq!(row.request_length, 201);
    assert_eq!(row.bytes_sent, 553);
    assert_eq!(row.host, "localhost");

    let stats = Arc::clone(&running.stats);
    stop(running).await;
    assert!(rows.try_recv().is_err());

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.rows_written, 1);
    assert_eq!(snapshot.lost(), 0);
}

#[tokio::test]
async fn bad_datagrams_do_not_stop_the_receiver() {
    let (sink, mut rows) = ChannelSink::new();
    let running = start_receiver(Arc::new(sink)).await;

    send(running.target, "not json at all").await;
    send(running.target, r#"{"request":"GET /only-two"}"#).await;
    send(running.target, "   ").await;
    send(
        running.target,
        r#"{"date":1751372240,"request":"POST /after HTTP/2.0","status":"201"}"#,
    )
    .await;

    let row = next_row(&mut rows).await;
    assert_eq!(row.method, "POST");
    assert_eq!(row.uri, "/after");
    assert_eq!(row.status, 201);

    // The good record may overtake the bad ones on another worker.
    let stats = Arc::clone(&running.stats);
    for _ in 0..50 {
        if stats.snapshot().received == 4 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    stop(running).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.empty_skipped, 1);
    assert_eq!(snapshot.decode_failures, 1);
    assert_eq!(snapshot.structural_failures, 1);
    assert_eq!(snapshot.rows_written, 1);
}

#[tokio::test]
async fn datagram_is_inserted_into_clickhouse() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            "INSERT INTO nginx_access_logs FORMAT JSONEachRow".into(),
        ))
        .match_body(Matcher::PartialJsonString(
            r#"{"time_iso8601":"2025-07-01 12:17:20","request_uri":"/hyperfApi/demo/test","status":200,"body_bytes_sent":154,"request_time":0.071}"#.to_string(),
        ))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let sink = ClickHouseSink::new(ClickHouseConfig::new(server.url()))
        .expect("failed to create sink");
    let running = start_receiver(Arc::new(sink)).await;
    let stats = Arc::clone(&running.stats);

    send(running.target, SAMPLE).await;
    for _ in 0..100 {
        if stats.snapshot().rows_written == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    stop(running).await;

    assert_eq!(stats.snapshot().rows_written, 1);
    mock.assert_async().await;
}
