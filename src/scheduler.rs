//! Execution backends for jobs.
//!
//! A [`Scheduler`] accepts a [`JobEnvelope`] and owns how (and when) it
//! runs. Backends are interchangeable: swapping one for another changes
//! delivery guarantees and latency, never job semantics.
//!
//! Three backends are provided:
//!
//! - [`inline::InlineScheduler`] executes synchronously in the caller's
//!   task, for local environments;
//! - [`queue::MemoryQueue`] emulates an at-least-once distributed queue
//!   with scheduled delivery and policy-driven retries;
//! - [`capture::CaptureScheduler`] records jobs without executing them,
//!   for assertions in tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobEnvelope;

pub mod capture;
pub mod inline;
pub mod queue;

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("failed to encode job parameters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("queue backend unavailable: {0}")]
    Backend(String),
}

impl From<EnqueueError> for crate::job::JobError {
    fn from(value: EnqueueError) -> Self {
        match value {
            // An unencodable payload will fail on every delivery.
            EnqueueError::Encode(error) => Self::Codec(error),
            // A backend hiccup is worth redelivering the enqueuing job for.
            EnqueueError::Backend(message) => Self::Other(message),
        }
    }
}

/// Accepts jobs for execution.
///
/// `enqueue` returns once the job is accepted for delivery, not once it has
/// executed. Delivery is at-least-once for queued backends, so every job
/// must tolerate duplicate delivery.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), EnqueueError>;
}
