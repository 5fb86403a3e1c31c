//! Synchronous in-process execution backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::registry::JobRegistry;
use crate::job::{JobContext, JobEnvelope, Services};
use crate::retry::RetryPolicy;

use super::{EnqueueError, Scheduler};

/// Executes each job in the caller's task, immediately.
///
/// Intended for local and test environments. The semantics match the queue
/// backend with two deliberate differences in delivery only: `scheduled_at`
/// is not waited for, and retry backoff is applied as repeated immediate
/// attempts (the delay that would have applied is logged). The retry
/// budget itself follows the same [`RetryPolicy`] as the queue backend.
#[derive(Clone)]
pub struct InlineScheduler {
    registry: Arc<JobRegistry>,
    services: Services,
    policy: RetryPolicy,
}

impl InlineScheduler {
    pub fn new(registry: Arc<JobRegistry>, services: Services, policy: RetryPolicy) -> Self {
        Self {
            registry,
            services,
            policy,
        }
    }
}

#[async_trait]
impl Scheduler for InlineScheduler {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), EnqueueError> {
        let ctx = JobContext::new(Arc::new(self.clone()), self.services.clone());
        let mut attempt: u16 = 1;
        loop {
            match self.registry.run(&ctx, &envelope).await {
                Ok(_) => return Ok(()),
                Err(error) if self.policy.exhausted(attempt) => {
                    tracing::error!(
                        %error,
                        attempt,
                        "Job {} exhausted its retry budget inline and is discarded",
                        envelope.name
                    );
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        attempt,
                        delay = %self.policy.delay_for(attempt),
                        "Job {} failed inline, retrying immediately",
                        envelope.name
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeDelta;
    use serde::{Deserialize, Serialize};

    use crate::backoff::BackoffStrategy;
    use crate::job::{JobError, JobHandler};
    use crate::model::ShopId;
    use crate::test_support;

    use super::*;

    static COMPLETED: AtomicUsize = AtomicUsize::new(0);
    static RETRYABLE_CALLS: AtomicUsize = AtomicUsize::new(0);
    static TERMINAL_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Serialize, Deserialize)]
    struct NoParams;

    struct CompletesJob;

    #[async_trait]
    impl JobHandler for CompletesJob {
        type Params = NoParams;
        const NAME: &'static str = "test.completes";

        async fn perform(
            _ctx: &JobContext,
            _shop: &ShopId,
            _params: Self::Params,
        ) -> Result<(), JobError> {
            COMPLETED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysRetryableJob;

    #[async_trait]
    impl JobHandler for AlwaysRetryableJob {
        type Params = NoParams;
        const NAME: &'static str = "test.always_retryable";

        async fn perform(
            _ctx: &JobContext,
            _shop: &ShopId,
            _params: Self::Params,
        ) -> Result<(), JobError> {
            RETRYABLE_CALLS.fetch_add(1, Ordering::SeqCst);
            Err(JobError::Other("still flaky".to_owned()))
        }
    }

    struct TerminalJob;

    #[async_trait]
    impl JobHandler for TerminalJob {
        type Params = NoParams;
        const NAME: &'static str = "test.terminal";

        async fn perform(
            _ctx: &JobContext,
            shop: &ShopId,
            _params: Self::Params,
        ) -> Result<(), JobError> {
            TERMINAL_CALLS.fetch_add(1, Ordering::SeqCst);
            Err(JobError::SessionNotFound(shop.clone()))
        }
    }

    fn inline(policy: RetryPolicy) -> InlineScheduler {
        let registry = Arc::new(
            JobRegistry::new()
                .register::<CompletesJob>()
                .register::<AlwaysRetryableJob>()
                .register::<TerminalJob>(),
        );
        let (services, _) = test_support::services();
        InlineScheduler::new(registry, services, policy)
    }

    fn zero_backoff(max_attempts: u16) -> RetryPolicy {
        RetryPolicy::new(max_attempts, BackoffStrategy::constant(TimeDelta::zero()))
    }

    #[tokio::test]
    async fn executes_in_the_callers_task() {
        let inline = inline(zero_backoff(3));
        CompletesJob::builder()
            .with_params(NoParams)
            .enqueue_to(&inline, "shop-1".into())
            .await
            .unwrap();
        assert_eq!(COMPLETED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failures_consume_the_shared_retry_budget() {
        let inline = inline(zero_backoff(3));
        AlwaysRetryableJob::builder()
            .with_params(NoParams)
            .enqueue_to(&inline, "shop-1".into())
            .await
            .unwrap();
        assert_eq!(RETRYABLE_CALLS.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failures_run_exactly_once() {
        let inline = inline(zero_backoff(5));
        TerminalJob::builder()
            .with_params(NoParams)
            .enqueue_to(&inline, "shop-1".into())
            .await
            .unwrap();
        assert_eq!(TERMINAL_CALLS.load(Ordering::SeqCst), 1);
    }
}
