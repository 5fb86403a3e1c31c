//! An in-process emulation of an at-least-once distributed queue.
//!
//! Provided as a correct (but not optimized) backend for local use and for
//! tests that need real delivery semantics: scheduled delivery, independent
//! queues, policy-driven redelivery of retryable failures, and discard once
//! the retry budget is spent.
//!
//! **This is not designed for use in a production system**; production
//! deployments put a real task queue behind [`Scheduler`] and run
//! [`QueueWorker`]-shaped consumers against it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::registry::JobRegistry;
use crate::job::{JobContext, JobEnvelope, Queue, Services};
use crate::retry::RetryPolicy;

use super::{EnqueueError, Scheduler};

/// Delivery state of one enqueued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Scheduled,
    Executing,
    Retryable,
    Complete,
    Discarded,
}

/// One job record as the queue holds it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: u64,
    pub envelope: JobEnvelope,
    pub status: DeliveryStatus,
    pub attempt: u16,
    pub deliver_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

type Waker = mpsc::UnboundedSender<()>;

#[derive(Default)]
struct Inner {
    deliveries: RwLock<Vec<Delivery>>,
    id_counter: AtomicU64,
    wakers: RwLock<Vec<Waker>>,
    paused: AtomicBool,
}

/// The queue itself. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the queue in paused mode: workers are not woken on enqueue.
    /// Call [`MemoryQueue::notify_all`] to release them.
    pub fn paused(self) -> Self {
        self.inner.paused.store(true, Ordering::Relaxed);
        self
    }

    /// Wakes every worker to re-scan for ready deliveries.
    pub fn notify_all(&self) {
        if let Ok(wakers) = self.inner.wakers.read() {
            for waker in wakers.iter() {
                let _ = waker.send(());
            }
        }
    }

    /// Snapshot of every delivery, for assertions.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.inner
            .deliveries
            .read()
            .expect("queue lock poisoned")
            .clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<()> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut wakers) = self.inner.wakers.write() {
            wakers.push(sender);
        }
        receiver
    }

    fn notify(&self) {
        if !self.inner.paused.load(Ordering::Relaxed) {
            self.notify_all();
        }
    }

    fn next_deliver_at(&self, queue: Option<&Queue>) -> Option<DateTime<Utc>> {
        self.inner
            .deliveries
            .read()
            .ok()?
            .iter()
            .filter(|delivery| {
                matches!(
                    delivery.status,
                    DeliveryStatus::Scheduled | DeliveryStatus::Retryable
                ) && queue.map_or(true, |q| delivery.envelope.queue == *q)
            })
            .map(|delivery| delivery.deliver_at)
            .min()
    }

    /// Claims the earliest due delivery: check-and-mark under one lock so
    /// two workers cannot claim the same record.
    fn claim_ready(&self, queue: Option<&Queue>) -> Option<Delivery> {
        let mut deliveries = self.inner.deliveries.write().ok()?;
        let due_before = Utc::now() + TimeDelta::milliseconds(100);
        let mut ready = deliveries
            .iter_mut()
            .filter(|delivery| {
                matches!(
                    delivery.status,
                    DeliveryStatus::Scheduled | DeliveryStatus::Retryable
                ) && delivery.deliver_at < due_before
                    && queue.map_or(true, |q| delivery.envelope.queue == *q)
            })
            .collect::<Vec<_>>();
        ready.sort_by_key(|delivery| delivery.deliver_at);
        ready.first_mut().map(|delivery| {
            delivery.status = DeliveryStatus::Executing;
            delivery.attempt += 1;
            delivery.clone()
        })
    }

    fn update(&self, id: u64, f: impl FnOnce(&mut Delivery)) {
        match self.inner.deliveries.write() {
            Ok(mut deliveries) => {
                if let Some(delivery) = deliveries.iter_mut().find(|d| d.id == id) {
                    f(delivery);
                }
            }
            Err(_) => tracing::error!(id, "Queue lock poisoned while updating delivery"),
        }
    }

    fn mark_complete(&self, id: u64) {
        self.update(id, |delivery| {
            delivery.status = DeliveryStatus::Complete;
            delivery.last_error = None;
        });
    }

    fn mark_retryable(&self, id: u64, deliver_at: DateTime<Utc>, error: String) {
        self.update(id, |delivery| {
            delivery.status = DeliveryStatus::Retryable;
            delivery.deliver_at = deliver_at;
            delivery.last_error = Some(error);
        });
        self.notify();
    }

    fn mark_discarded(&self, id: u64, error: String) {
        self.update(id, |delivery| {
            delivery.status = DeliveryStatus::Discarded;
            delivery.last_error = Some(error);
        });
    }
}

#[async_trait]
impl Scheduler for MemoryQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), EnqueueError> {
        let id = self.inner.id_counter.fetch_add(1, Ordering::SeqCst);
        let deliver_at = envelope.scheduled_at;
        self.inner
            .deliveries
            .write()
            .map_err(|_| EnqueueError::Backend("queue lock poisoned".to_owned()))?
            .push(Delivery {
                id,
                envelope,
                status: DeliveryStatus::Scheduled,
                attempt: 0,
                deliver_at,
                last_error: None,
            });
        self.notify();
        Ok(())
    }
}

/// Pulls ready deliveries off a [`MemoryQueue`] and runs them through a
/// [`JobRegistry`].
///
/// Each worker is independent; running several (optionally pinned to a
/// queue via [`QueueWorker::for_queue`]) gives concurrent, per-queue
/// delivery. Retryable failures are redelivered after the policy's backoff
/// until the budget is spent, then discarded.
pub struct QueueWorker {
    queue: MemoryQueue,
    registry: Arc<JobRegistry>,
    services: Services,
    policy: RetryPolicy,
    only_queue: Option<Queue>,
}

impl QueueWorker {
    const DEFAULT_DELAY: std::time::Duration = std::time::Duration::from_secs(30);
    const DELTA: std::time::Duration = std::time::Duration::from_millis(15);

    pub fn new(
        queue: MemoryQueue,
        registry: Arc<JobRegistry>,
        services: Services,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            registry,
            services,
            policy,
            only_queue: None,
        }
    }

    /// Restricts this worker to a single logical queue.
    pub fn for_queue(mut self, queue: impl Into<Queue>) -> Self {
        self.only_queue = Some(queue.into());
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut wake = self.queue.subscribe();
        let ctx = JobContext::new(Arc::new(self.queue.clone()), self.services.clone());
        loop {
            let delay = match self.queue.next_deliver_at(self.only_queue.as_ref()) {
                Some(at) => (at - Utc::now())
                    .to_std()
                    .unwrap_or(Self::DELTA)
                    .min(Self::DEFAULT_DELAY),
                None => Self::DEFAULT_DELAY,
            };
            if delay <= Self::DELTA {
                if let Some(delivery) = self.queue.claim_ready(self.only_queue.as_ref()) {
                    self.process(&ctx, delivery).await;
                    continue;
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake.recv() => {},
                _ = tokio::time::sleep(delay) => {},
            }
        }
        tracing::debug!("Shutting down queue worker");
    }

    async fn process(&self, ctx: &JobContext, delivery: Delivery) {
        match self.registry.run(ctx, &delivery.envelope).await {
            Ok(_) => self.queue.mark_complete(delivery.id),
            Err(error) if self.policy.exhausted(delivery.attempt) => {
                tracing::error!(
                    %error,
                    attempt = delivery.attempt,
                    "Job {} spent its retry budget and is discarded",
                    delivery.envelope.name
                );
                self.queue.mark_discarded(delivery.id, error.to_string());
            }
            Err(error) => {
                let deliver_at = Utc::now() + self.policy.delay_for(delivery.attempt);
                tracing::warn!(
                    %error,
                    attempt = delivery.attempt,
                    %deliver_at,
                    "Job {} failed, redelivering",
                    delivery.envelope.name
                );
                self.queue
                    .mark_retryable(delivery.id, deliver_at, error.to_string());
            }
        }
    }
}
