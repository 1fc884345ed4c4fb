// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size pool of long-lived workers draining a bounded task queue.
//!
//! The pool exists so the datagram receive loop never does real work and never
//! waits. [`WorkerPool::submit`] is a non-blocking enqueue. A full queue is
//! reported to the caller at once, and the caller decides whether to drop.
//!
//! # Fault containment
//!
//! Each worker runs its task as a separate tokio task and awaits its
//! [`JoinHandle`](tokio::task::JoinHandle). A panic inside the task surfaces
//! as a [`JoinError`] at that boundary. It is logged with the worker id and
//! counted. The worker then picks up the next task. The same boundary enforces
//! the optional per-task deadline.
//! A task that overruns is aborted, so a hung downstream call cannot hold a
//! worker forever.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] drops the only sender. Workers keep receiving
//! until the queue is empty and then exit. Every task accepted by `submit`
//! therefore runs before `shutdown` returns. Workers are tracked by a
//! [`TaskTracker`], so concurrent callers of `shutdown` all wait for the same
//! drain.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument, Span};

use crate::constants::{QUEUE_SLOTS_PER_WORKER, WORKERS_PER_CPU};
use crate::errors::{PoolError, SubmitError};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Deadline for a single task. `None` lets tasks run indefinitely.
    pub task_timeout: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let worker_count = default_worker_count();
        Self {
            worker_count,
            queue_capacity: worker_count.saturating_mul(QUEUE_SLOTS_PER_WORKER),
            task_timeout: None,
        }
    }
}

/// A multiple of the available processors. The workload is I/O bound, so far
/// more workers than cores are useful.
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_mul(WORKERS_PER_CPU)
}

#[derive(Debug, Default)]
struct PoolCounters {
    completed: AtomicU64,
    panicked: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub completed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    pub queued: usize,
}

pub struct WorkerPool {
    // `None` once shutdown has begun.
    tx: RwLock<Option<mpsc::Sender<Task>>>,
    workers: TaskTracker,
    counters: Arc<PoolCounters>,
    worker_count: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Starts `worker_count` workers on the current tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<WorkerPool, PoolError> {
        if config.worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if config.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let (tx, rx) = mpsc::channel::<Task>(config.queue_capacity);
        let rx = Arc::new(TokioMutex::new(rx));
        let counters = Arc::new(PoolCounters::default());

        let workers = TaskTracker::new();
        for id in 0..config.worker_count {
            // Workers log under the span of whoever started the pool.
            workers.spawn_on(
                run_worker(
                    id,
                    Arc::clone(&rx),
                    config.task_timeout,
                    Arc::clone(&counters),
                )
                .instrument(Span::current()),
                &runtime,
            );
        }
        workers.close();

        debug!(
            "Worker pool started with {} workers and queue capacity {}",
            config.worker_count, config.queue_capacity
        );

        Ok(WorkerPool {
            tx: RwLock::new(Some(tx)),
            workers,
            counters,
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Enqueues a task without waiting.
    ///
    /// Returns [`SubmitError::QueueFull`] when every queue slot is taken and
    /// [`SubmitError::Closed`] once [`WorkerPool::shutdown`] has been called.
    /// Neither is retried here.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::Closed);
        };
        tx.try_send(Box::pin(task)).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Stops intake, runs every queued task and waits for all workers to exit.
    /// Any number of callers may call it, concurrently or not; each returns
    /// only once the queue is drained.
    pub async fn shutdown(&self) {
        // Taking the write lock waits out any submit in progress.
        let sender = self
            .tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("Draining worker pool ({} workers)", self.workers.len());
        }
        drop(sender);

        self.workers.wait().await;
        debug!("Worker pool stopped");
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Tasks waiting in the queue, not counting those already running.
    #[must_use]
    pub fn queued(&self) -> usize {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            queued: self.queued(),
        }
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<TokioMutex<mpsc::Receiver<Task>>>,
    task_timeout: Option<Duration>,
    counters: Arc<PoolCounters>,
) {
    loop {
        // The lock is only held while waiting for the next task.
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        let mut handle = tokio::spawn(task.in_current_span());
        let joined = match task_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!("Worker {id}: task exceeded {limit:?} and was aborted");
                    continue;
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_panic() => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!("Worker {id}: task panicked: {}", panic_message(e));
            }
            Err(e) => {
                error!("Worker {id}: task failed: {e}");
            }
        }
    }
    debug!("Worker {id} stopped");
}

fn panic_message(join_err: JoinError) -> String {
    match join_err.into_panic().downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
