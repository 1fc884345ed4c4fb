// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion counters.
//!
//! Every failure on the ingestion path is handled locally and only logged, so
//! these counters are the one place where drops become visible in aggregate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    submitted: AtomicU64,
    empty_skipped: AtomicU64,
    dropped_overload: AtomicU64,
    read_errors: AtomicU64,
    decode_failures: AtomicU64,
    structural_failures: AtomicU64,
    coercion_failures: AtomicU64,
    rows_written: AtomicU64,
    sink_failures: AtomicU64,
}

/// A point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub submitted: u64,
    pub empty_skipped: u64,
    pub dropped_overload: u64,
    pub read_errors: u64,
    pub decode_failures: u64,
    pub structural_failures: u64,
    pub coercion_failures: u64,
    pub rows_written: u64,
    pub sink_failures: u64,
}

macro_rules! counters {
    ($($name:ident => $incr:ident),* $(,)?) => {
        impl IngestStats {
            $(
                pub fn $incr(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            #[must_use]
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    received => record_received,
    submitted => record_submitted,
    empty_skipped => record_empty_skipped,
    dropped_overload => record_dropped_overload,
    read_errors => record_read_error,
    decode_failures => record_decode_failure,
    structural_failures => record_structural_failure,
    coercion_failures => record_coercion_failure,
    rows_written => record_row_written,
    sink_failures => record_sink_failure,
}

impl StatsSnapshot {
    /// Datagrams that were received but did not end up as a written row.
    /// Task panics and timeouts are counted by the worker pool instead.
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.dropped_overload
            + self.decode_failures
            + self.structural_failures
            + self.coercion_failures
            + self.sink_failures
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} submitted={} empty={} dropped_overload={} read_errors={} \
             decode_failures={} structural_failures={} coercion_failures={} \
             rows_written={} sink_failures={}",
            self.received,
            self.submitted,
            self.empty_skipped,
            self.dropped_overload,
            self.read_errors,
            self.decode_failures,
            self.structural_failures,
            self.coercion_failures,
            self.rows_written,
            self.sink_failures,
        )
    }
}
