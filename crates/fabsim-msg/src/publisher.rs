//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Bounded outbound queue drained by a publisher worker pool."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabsim_rt::TaskGroup;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::{deliver, OutboundBatch, RetryPolicy, Transport};

/// Hooks invoked by the publisher as records move through it.
pub trait DeliveryObserver: Send + Sync {
    /// A record reached the transport.
    fn published(&self, _machine_id: &str, _kind: &str) {}
    /// A publish attempt was retried.
    fn retried(&self, _topic: &str) {}
    /// A record was dropped after exhausting its retries.
    fn failed(&self, _topic: &str) {}
    /// A whole batch was dropped because the queue was full.
    fn queue_dropped(&self, _machine_id: &str) {}
}

struct NoopObserver;

impl DeliveryObserver for NoopObserver {}

/// Snapshot of publisher counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    /// Batches accepted into the queue.
    pub enqueued: u64,
    /// Records handed to the transport.
    pub published: u64,
    /// Retry attempts across all records.
    pub retries: u64,
    /// Records dropped after their last attempt failed.
    pub failures: u64,
    /// Batches dropped because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    published: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Sizing of the outbound pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Batches the queue can hold before new ones are dropped.
    pub queue_capacity: usize,
    /// Concurrent publisher workers.
    pub workers: usize,
    /// Retry budget per record.
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cloneable producer side of the outbound queue.
#[derive(Clone)]
pub struct PublisherHandle {
    sender: mpsc::Sender<OutboundBatch>,
    counters: Arc<Counters>,
    observer: Arc<dyn DeliveryObserver>,
}

impl PublisherHandle {
    /// Queue `batch` without waiting. Returns `false` when the batch was
    /// dropped because the queue is full or closed.
    pub fn try_enqueue(&self, batch: OutboundBatch) -> bool {
        match self.sender.try_send(batch) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(batch)) | Err(TrySendError::Closed(batch)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.observer.queue_dropped(&batch.machine_id);
                debug!(machine_id = %batch.machine_id, "outbound queue full; batch dropped");
                false
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> PublisherStats {
        self.counters.snapshot()
    }
}

/// Owns the worker pool that drains the outbound queue into a transport.
pub struct Publisher {
    handle: PublisherHandle,
    workers: TaskGroup,
    transport_name: &'static str,
}

impl Publisher {
    /// Spawn `config.workers` workers publishing to `transport`.
    pub fn spawn(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        Self::spawn_with_observer(transport, config, Arc::new(NoopObserver))
    }

    /// Like [`Publisher::spawn`], reporting deliveries to `observer`.
    pub fn spawn_with_observer(
        transport: Arc<dyn Transport>,
        config: PublisherConfig,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let transport_name = transport.name();

        let mut workers = TaskGroup::new("publisher");
        for worker in 0..config.workers.max(1) {
            workers.spawn(run_worker(
                worker,
                receiver.clone(),
                transport.clone(),
                config.retry,
                counters.clone(),
                observer.clone(),
            ));
        }
        info!(
            transport = transport_name,
            workers = workers.len(),
            queue_capacity = config.queue_capacity,
            "publisher started"
        );

        Self {
            handle: PublisherHandle {
                sender,
                counters,
                observer,
            },
            workers,
            transport_name,
        }
    }

    /// Producer handle for device tasks.
    pub fn handle(&self) -> PublisherHandle {
        self.handle.clone()
    }

    /// Current counters.
    pub fn stats(&self) -> PublisherStats {
        self.handle.stats()
    }

    /// Close the queue and wait up to `grace` for workers to drain it.
    ///
    /// Workers only see the queue closed once every [`PublisherHandle`] clone
    /// has been dropped, so producers must be stopped first.
    pub async fn shutdown(self, grace: Duration) -> PublisherStats {
        let Publisher {
            handle,
            workers,
            transport_name,
        } = self;
        let counters = handle.counters.clone();
        drop(handle);
        let aborted = workers.join(grace).await;
        let stats = counters.snapshot();
        info!(
            transport = transport_name,
            aborted_workers = aborted,
            published = stats.published,
            failures = stats.failures,
            dropped = stats.dropped,
            "publisher stopped"
        );
        stats
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<OutboundBatch>>>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    counters: Arc<Counters>,
    observer: Arc<dyn DeliveryObserver>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(batch) = next else {
            debug!(worker, "outbound queue closed; worker exiting");
            break;
        };
        for record in batch.records {
            let report = deliver(transport.as_ref(), &record.topic, record.payload, &retry).await;
            for _ in 0..report.retries() {
                observer.retried(&record.topic);
            }
            counters
                .retries
                .fetch_add(u64::from(report.retries()), Ordering::Relaxed);
            match report.error {
                None => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                    observer.published(&batch.machine_id, record.kind);
                }
                Some(err) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    observer.failed(&record.topic);
                    warn!(
                        worker,
                        transport = transport.name(),
                        machine_id = %batch.machine_id,
                        topic = %record.topic,
                        attempts = report.attempts,
                        error = %err,
                        "dropping reading after failed publish"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryTransport, OutboundRecord};

    fn batch(machine: &str) -> OutboundBatch {
        OutboundBatch::new(
            machine,
            vec![
                OutboundRecord::new(format!("f/{machine}/energy"), "energy", &b"{}"[..]),
                OutboundRecord::new(format!("f/{machine}/production"), "production", &b"{}"[..]),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn drains_batches_into_transport() {
        let transport = InMemoryTransport::new();
        let publisher = Publisher::spawn(Arc::new(transport.clone()), PublisherConfig::default());
        let handle = publisher.handle();
        assert!(handle.try_enqueue(batch("m1")));
        assert!(handle.try_enqueue(batch("m2")));
        drop(handle);

        let stats = publisher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.published, 4);
        assert_eq!(transport.messages_for("f/m2/production").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_records_are_counted_and_dropped() {
        let transport = InMemoryTransport::new();
        transport.fail_next(3);
        let config = PublisherConfig {
            workers: 1,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(10),
            },
            ..PublisherConfig::default()
        };
        let publisher = Publisher::spawn(Arc::new(transport.clone()), config);
        let handle = publisher.handle();
        handle.try_enqueue(batch("m1"));
        drop(handle);

        let stats = publisher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.published, 1);
        assert_eq!(transport.messages()[0].topic, "f/m1/production");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_whole_batch() {
        let transport = InMemoryTransport::new();
        let config = PublisherConfig {
            queue_capacity: 1,
            workers: 1,
            ..PublisherConfig::default()
        };
        let publisher = Publisher::spawn(Arc::new(transport), config);
        let handle = publisher.handle();
        // The worker cannot run before this task yields, so the second batch
        // finds the single slot taken.
        assert!(handle.try_enqueue(batch("m1")));
        assert!(!handle.try_enqueue(batch("m1")));
        assert_eq!(handle.stats().dropped, 1);
        drop(handle);
        publisher.shutdown(Duration::from_secs(1)).await;
    }
}
