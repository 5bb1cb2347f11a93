//! Bounded job queue and worker pool backing asynchronous imports (§4.5).
//!
//! Non-blocking `enqueue`: when the channel is full the job is silently
//! dropped — this is the documented at-most-once policy, durability across
//! restarts is out of scope. A worker pool of fixed size reads jobs and
//! invokes a single worker function injected at construction; worker errors
//! are swallowed, since callers discover failures via the synchronous import
//! path instead.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use obs_core::CancellationToken;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default bounded channel capacity (§4.5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Snapshot counters for a [`JobQueue`].
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
}

impl QueueStats {
    /// Number of jobs successfully enqueued.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Number of jobs dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of jobs a worker finished handling (success or swallowed error).
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// A bounded FIFO job queue with a fixed-size worker pool.
///
/// Jobs of type `J` are handed to a worker function of type `F`, invoked
/// concurrently by up to `worker_count` tasks pulling from a single shared
/// channel. There is no ordering guarantee across jobs; importers consuming
/// this queue must be idempotent under concurrent invocation (§4.5).
pub struct JobQueue<J> {
    sender: mpsc::Sender<J>,
    stats: Arc<QueueStats>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<J> JobQueue<J>
where
    J: Send + 'static,
{
    /// Spawns a queue of capacity `capacity` backed by `worker_count` workers,
    /// each running `worker` on every job it receives. A worker's `Err`
    /// return is logged and otherwise swallowed — callers discover import
    /// failures through the synchronous endpoints, never through the queue.
    pub fn spawn<F, Fut>(capacity: usize, worker_count: usize, worker: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send,
    {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(QueueStats::default());
        let cancel = CancellationToken::new();
        let worker = Arc::new(worker);

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let stats = Arc::clone(&stats);
                let cancel = cancel.clone();
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut guard = receiver.lock().await;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => None,
                                job = guard.recv() => job,
                            }
                        };
                        let Some(job) = job else {
                            debug!(target: "obs.queue", worker = id, "worker draining, channel closed");
                            break;
                        };
                        if let Err(err) = worker(job).await {
                            warn!(target: "obs.queue", worker = id, error = %err, "worker returned an error, swallowing it");
                        }
                        stats.processed.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        Self {
            sender,
            stats,
            cancel,
            workers,
        }
    }

    /// Enqueues `job` without blocking. Returns `true` if accepted, `false`
    /// if the queue was full and the job was dropped.
    pub fn enqueue(&self, job: J) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                warn!(target: "obs.queue", "queue full, dropping job");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Current enqueue/drop/process counters.
    #[must_use]
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Signals cancellation, stops accepting new work, and waits for every
    /// worker to finish draining before returning.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.sender);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}
