//! A recurring-billing engine for subscription contracts on a commerce
//! platform.
//!
//! Everything the engine does is a job: charging a billing cycle, reacting
//! to a failed attempt, retrying after a payment decline or inventory
//! shortage, skipping a cycle or cancelling a contract once a retry budget
//! is spent, and fanning out one charge job per due contract. Jobs carry
//! typed, JSON-serializable parameters and communicate only by enqueuing
//! further jobs, so the whole engine runs against any at-least-once
//! delivery backend implementing [`scheduler::Scheduler`].
//!
//! The pieces:
//!
//! * [`job`] defines the job abstraction, error classification and the
//!   registry that dispatches deliveries to handlers.
//! * [`jobs`] is the closed set of jobs the engine runs.
//! * [`dunning`] is the retry state machine for failed billing attempts,
//!   with independent payment and inventory budgets per contract.
//! * [`billing`] fans a billing window out into per-contract charge jobs.
//! * [`webhook`] translates platform webhook events into jobs.
//! * [`scheduler`] holds the delivery backends: an in-process queue with
//!   real delivery semantics, an inline backend for tests, and a capture
//!   backend for asserting on enqueues.
//! * [`store`] is the narrow interface to the commerce platform; the
//!   engine owns no persistence of its own.
//!
//! [`Engine`] wires these together over the in-process queue.

pub mod backoff;
pub mod billing;
pub mod dunning;
pub mod job;
pub mod jobs;
pub mod model;
pub mod prelude;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::registry::JobRegistry;
use crate::job::Services;
use crate::retry::RetryPolicy;
use crate::scheduler::queue::{MemoryQueue, QueueWorker};

#[derive(Debug, Error)]
pub enum RebillError {
    #[error("worker task failed during shutdown: {0}")]
    GracefulShutdownFailed(String),
}

/// The assembled engine: a queue, a registry of every engine job, and the
/// workers pulling from it.
///
/// Construction is explicit: callers build the [`Services`] and hand them
/// in; nothing is looked up through globals. Swapping the in-process queue
/// for a distributed backend means running [`QueueWorker`]-shaped consumers
/// against that backend instead of using this struct.
pub struct Engine {
    queue: MemoryQueue,
    registry: Arc<JobRegistry>,
    services: Services,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// An engine over a fresh in-process queue, with every engine job
    /// registered and the default retry policy.
    pub fn new(services: Services) -> Self {
        Self {
            queue: MemoryQueue::new(),
            registry: Arc::new(jobs::engine_registry()),
            services,
            policy: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the registry, for embedders adding jobs of their own
    /// alongside the engine's.
    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// The handle to enqueue jobs on; cheap to clone and share.
    pub fn scheduler(&self) -> MemoryQueue {
        self.queue.clone()
    }

    /// Spawns a worker consuming every queue.
    pub fn spawn_worker(&mut self) -> &mut Self {
        let worker = QueueWorker::new(
            self.queue.clone(),
            Arc::clone(&self.registry),
            self.services.clone(),
            self.policy,
        );
        self.workers.push(worker.spawn(self.shutdown.child_token()));
        self
    }

    /// Spawns a worker pinned to one logical queue.
    pub fn spawn_worker_for(&mut self, queue: impl Into<job::Queue>) -> &mut Self {
        let worker = QueueWorker::new(
            self.queue.clone(),
            Arc::clone(&self.registry),
            self.services.clone(),
            self.policy,
        )
        .for_queue(queue);
        self.workers.push(worker.spawn(self.shutdown.child_token()));
        self
    }

    /// Stops every worker and waits for in-flight jobs to finish.
    pub async fn graceful_shutdown(self) -> Result<(), RebillError> {
        tracing::debug!("Shutting down billing engine");
        self.shutdown.cancel();
        let results = futures::future::join_all(self.workers).await;
        for result in results {
            result.map_err(|error| RebillError::GracefulShutdownFailed(error.to_string()))?;
        }
        Ok(())
    }
}
