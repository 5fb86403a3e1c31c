//! The billing-cycle fan-out: one independent charge job per due contract.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::job::{JobContext, JobError, JobHandler};
use crate::jobs::{ChargeCycleJob, ChargeParams};
use crate::model::ShopId;

/// Counts from one fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub enqueued: usize,
    pub failed: usize,
}

/// Discovers contracts due for billing and enqueues their charge jobs.
///
/// The fan-out tolerates partial failure: one contract's enqueue failing is
/// logged and counted, and every other contract still gets its job. Charge
/// jobs are individually retried and dunned from there; nothing is rolled
/// back. Duplicate delivery of the same trigger is harmless because the
/// charge job claims `(contract, cycle)` before submitting payment.
pub struct BillingCycleScheduler<'a> {
    ctx: &'a JobContext,
}

impl<'a> BillingCycleScheduler<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(%shop, %window))]
    pub async fn run(
        &self,
        shop: &ShopId,
        window: DateTime<Utc>,
    ) -> Result<FanOutSummary, JobError> {
        let due = self.ctx.services.contracts.due_contracts(shop, window).await?;
        tracing::debug!(contracts = due.len(), "Fanning out charge jobs");

        let results = futures::future::join_all(due.into_iter().map(|charge| {
            let scheduler = self.ctx.scheduler.clone();
            async move {
                ChargeCycleJob::builder()
                    .with_params(ChargeParams {
                        contract: charge.contract.clone(),
                        cycle_index: charge.cycle_index,
                        allow_overselling: false,
                    })
                    .enqueue_to(scheduler.as_ref(), charge.shop.clone())
                    .await
                    .map_err(|error| (charge, error))
            }
        }))
        .await;

        let mut summary = FanOutSummary::default();
        for result in results {
            match result {
                Ok(()) => summary.enqueued += 1,
                Err((charge, error)) => {
                    tracing::warn!(
                        contract = %charge.contract,
                        cycle = charge.cycle_index,
                        %error,
                        "Failed to enqueue charge job, continuing fan-out"
                    );
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            enqueued = summary.enqueued,
            failed = summary.failed,
            "Billing fan-out complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use crate::assert_enqueued;
    use crate::job::JobEnvelope;
    use crate::model::ContractId;
    use crate::scheduler::capture::CaptureScheduler;
    use crate::scheduler::{EnqueueError, Scheduler};
    use crate::test_support;

    use super::*;

    #[tokio::test]
    async fn enqueues_one_charge_job_per_due_contract() {
        let (services, stores) = test_support::services();
        let now = Utc::now();

        for id in ["c-1", "c-2"] {
            stores.contracts.insert(test_support::contract(id, "shop-1"));
            stores
                .contracts
                .add_cycle(&id.into(), test_support::cycle(3, now - TimeDelta::hours(2)));
        }
        stores.contracts.insert(test_support::contract("c-later", "shop-1"));
        stores.contracts.add_cycle(
            &"c-later".into(),
            test_support::cycle(0, now + TimeDelta::days(5)),
        );

        let capture = CaptureScheduler::new();
        let ctx = JobContext::new(Arc::new(capture.clone()), services);

        let summary = BillingCycleScheduler::new(&ctx)
            .run(&"shop-1".into(), now)
            .await
            .unwrap();

        assert_eq!(summary, FanOutSummary { enqueued: 2, failed: 0 });
        assert_enqueued!(2 jobs, to: capture, job: ChargeCycleJob);

        let mut contracts: Vec<ContractId> = capture
            .params_for::<ChargeCycleJob>()
            .into_iter()
            .map(|params| params.contract)
            .collect();
        contracts.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(contracts, vec!["c-1".into(), "c-2".into()]);
    }

    /// Fails the first N enqueues, then delegates to a capture.
    #[derive(Clone)]
    struct FlakyScheduler {
        inner: CaptureScheduler,
        remaining_failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Scheduler for FlakyScheduler {
        async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), EnqueueError> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(EnqueueError::Backend("queue briefly unavailable".to_owned()));
            }
            self.inner.enqueue(envelope).await
        }
    }

    #[tokio::test]
    async fn one_failed_enqueue_does_not_block_the_rest() {
        let (services, stores) = test_support::services();
        let now = Utc::now();
        for id in ["c-1", "c-2", "c-3"] {
            stores.contracts.insert(test_support::contract(id, "shop-1"));
            stores
                .contracts
                .add_cycle(&id.into(), test_support::cycle(0, now - TimeDelta::hours(1)));
        }

        let capture = CaptureScheduler::new();
        let flaky = FlakyScheduler {
            inner: capture.clone(),
            remaining_failures: Arc::new(AtomicUsize::new(1)),
        };
        let ctx = JobContext::new(Arc::new(flaky), services);

        let summary = BillingCycleScheduler::new(&ctx)
            .run(&"shop-1".into(), now)
            .await
            .unwrap();

        assert_eq!(summary, FanOutSummary { enqueued: 2, failed: 1 });
        assert_enqueued!(2 jobs, to: capture, job: ChargeCycleJob);
    }

    #[tokio::test]
    async fn a_shop_with_nothing_due_fans_out_nothing() {
        let (services, _stores) = test_support::services();
        let capture = CaptureScheduler::new();
        let ctx = JobContext::new(Arc::new(capture.clone()), services);

        let summary = BillingCycleScheduler::new(&ctx)
            .run(&"shop-1".into(), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary, FanOutSummary::default());
        assert!(capture.enqueued().is_empty());
    }
}
