// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9001;

/// Receive buffer size. Larger datagrams are truncated to this length.
pub const BUFFER_SIZE: usize = 60 * 1024;
pub const MIN_BUFFER_SIZE: usize = 512;

pub const WORKERS_PER_CPU: usize = 50;
pub const QUEUE_SLOTS_PER_WORKER: usize = 100;

pub const DEFAULT_CLICKHOUSE_TABLE: &str = "nginx_access_logs";
pub const DEFAULT_CLICKHOUSE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);
