//! The job registry: name to handler, and the run wrapper around every
//! execution.
//!
//! The registry is built once at process start and passed by reference into
//! whatever drives execution (a queue worker, the inline backend, a test).
//! There is deliberately no global registry.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::instrument;

use crate::store::UserError;

use super::{JobContext, JobEnvelope, JobError, JobHandler};

/// How a single delivery ended, from the backend's point of view.
///
/// Every variant is a successful delivery: the job must not be redelivered.
/// A retryable failure is not an outcome, it is the `Err` arm of
/// [`JobRegistry::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The job performed to completion.
    Done,
    /// The job failed terminally; retrying could never succeed, so the
    /// failure was logged and swallowed.
    Discarded,
    /// A mutation was rejected by business rules. Not retried: the same
    /// rules would reject it again.
    Rejected(Vec<UserError>),
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &JobContext,
        envelope: &JobEnvelope,
    ) -> Result<(), JobError>;
}

struct Handler<J>(PhantomData<fn() -> J>);

#[async_trait]
impl<J> ErasedHandler for Handler<J>
where
    J: JobHandler + Send + Sync + 'static,
{
    async fn run(&self, ctx: &JobContext, envelope: &JobEnvelope) -> Result<(), JobError> {
        let params: J::Params = serde_json::from_value(envelope.params.clone())?;
        J::perform(ctx, &envelope.shop, params).await
    }
}

/// Maps job names to handlers and rehydrates jobs delivered by a backend.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, Box<dyn ErasedHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its [`JobHandler::NAME`].
    pub fn register<J>(mut self) -> Self
    where
        J: JobHandler + Send + Sync + 'static,
    {
        self.handlers.insert(J::NAME, Box::new(Handler::<J>(PhantomData)));
        self
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Executes a delivered job.
    ///
    /// The wrapper owns the error contract of the whole engine:
    ///
    /// - terminal failures are logged at warn and swallowed, so the backend
    ///   sees a completed delivery and never redelivers;
    /// - business-rule rejections end the run without retry and surface the
    ///   user-error list in the outcome;
    /// - every other failure is re-thrown unchanged so the calling
    ///   backend's retry policy applies.
    #[instrument(skip(self, ctx, envelope), fields(job = %envelope.name, queue = %envelope.queue, shop = %envelope.shop))]
    pub async fn run(
        &self,
        ctx: &JobContext,
        envelope: &JobEnvelope,
    ) -> Result<RunOutcome, JobError> {
        let handler = match self.handlers.get(envelope.name.as_str()) {
            Some(handler) => handler,
            None => {
                let error = JobError::UnknownJob(envelope.name.clone());
                tracing::warn!(%error, "Discarding job with no registered handler");
                return Ok(RunOutcome::Discarded);
            }
        };

        tracing::debug!("Executing job {}", envelope.name);
        match handler.run(ctx, envelope).await {
            Ok(()) => {
                tracing::debug!("Job {} complete", envelope.name);
                Ok(RunOutcome::Done)
            }
            Err(JobError::Business(errors)) => {
                tracing::warn!(
                    ?errors,
                    "Job {} rejected by business rules and will not be retried",
                    envelope.name
                );
                Ok(RunOutcome::Rejected(errors))
            }
            Err(error) if error.is_terminal() => {
                tracing::warn!(
                    %error,
                    "Job {} failed terminally and will be discarded",
                    envelope.name
                );
                Ok(RunOutcome::Discarded)
            }
            Err(error) => {
                tracing::warn!(%error, "Job {} failed and may be retried", envelope.name);
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
