// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod clickhouse;
pub mod config;
pub mod constants;
pub mod converter;
pub mod errors;
pub mod ingest;
pub mod receiver;
pub mod record;
pub mod sink;
pub mod stats;
pub mod worker_pool;
