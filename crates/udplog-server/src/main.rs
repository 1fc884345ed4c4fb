// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use anyhow::Context;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use udplog::{
    clickhouse::ClickHouseSink,
    config::ServerConfig,
    ingest::Ingestor,
    receiver::LogReceiver,
    sink::{LogSink, Sink},
    stats::IngestStats,
    worker_pool::WorkerPool,
};

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.as_str())
        .unwrap_or("info");
    init_logging(log_level)?;

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading udplog configuration: {e}");
            return Err(e.into());
        }
    };
    debug!("Starting udplog server with {config:?}");

    let pool = Arc::new(WorkerPool::new(config.pool.clone()).context("creating worker pool")?);
    info!(
        "Worker pool started with {} workers and {} queue slots",
        pool.worker_count(),
        pool.queue_capacity()
    );

    let sink: Arc<dyn Sink> = match config.clickhouse.clone() {
        Some(clickhouse) => {
            info!(
                "Writing rows to ClickHouse table {} at {}",
                clickhouse.table, clickhouse.url
            );
            Arc::new(ClickHouseSink::new(clickhouse).context("creating ClickHouse sink")?)
        }
        None => {
            info!("UDPLOG_CLICKHOUSE_URL not set, rows will only be logged");
            Arc::new(LogSink)
        }
    };

    let stats = Arc::new(IngestStats::default());
    let ingestor = Ingestor::new(config.converter, Arc::clone(&sink), Arc::clone(&stats));
    let cancel_token = CancellationToken::new();

    let receiver = match LogReceiver::new(
        &config.receiver,
        Arc::clone(&pool),
        ingestor,
        cancel_token.clone(),
    )
    .await
    {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("Unable to start access log receiver: {e}");
            pool.shutdown().await;
            return Err(e.into());
        }
    };
    let receiver_handle = tokio::spawn(receiver.spin());
    info!(
        "udplog started: sink={}, coercion={}, timezone={}",
        sink.name(),
        config.converter.policy,
        config.converter.time_zone
    );

    wait_for_shutdown(&config, &stats, &pool).await;

    info!("Shutting down udplog server");
    cancel_token.cancel();
    if let Err(e) = receiver_handle.await {
        error!("Access log receiver exited abnormally: {e}");
    }
    pool.shutdown().await;
    log_stats(&stats, &pool);
    Ok(())
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).context("parsing log level")?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("Logging subsystem enabled");
    Ok(())
}

/// Logs counters every stats interval until ctrl-c.
async fn wait_for_shutdown(config: &ServerConfig, stats: &IngestStats, pool: &WorkerPool) {
    let Some(period) = config.stats_interval else {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
        }
        return;
    };

    let mut stats_interval = interval(period);
    stats_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                return;
            }
            _ = stats_interval.tick() => log_stats(stats, pool),
        }
    }
}

fn log_stats(stats: &IngestStats, pool: &WorkerPool) {
    let pool_snapshot = pool.snapshot();
    info!(
        "Ingest stats: {} completed={} panicked={} timed_out={} queued={}",
        stats.snapshot(),
        pool_snapshot.completed,
        pool_snapshot.panicked,
        pool_snapshot.timed_out,
        pool_snapshot.queued
    );
}
