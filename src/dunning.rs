//! The dunning state machine: what happens after a recurring charge fails.
//!
//! The engine triages the failed attempt's error code, consults the shop's
//! retry settings, and either schedules a retry, routes to inventory
//! recovery, or fires the merchant-configured terminal action. It never
//! blocks on side effects: every consequence is expressed as a further job
//! enqueue, and the only I/O here is reading settings and contract state
//! plus bumping the explicit failure-streak counters.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::instrument;

use crate::job::{JobContext, JobError, JobHandler};
use crate::jobs::{
    CancelContractJob, CancelParams, ChargeCycleJob, ChargeParams, InventoryNotifyJob,
    NotifyParams, SkipCycleJob, SkipParams,
};
use crate::model::{
    BillingAttempt, ContractStatus, ErrorClass, ErrorCode, OnFailure, Settings,
    SubscriptionContract,
};

/// What the engine decided to do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DunningDecision {
    /// A retry charge was scheduled for this future timestamp.
    RetryScheduled { at: DateTime<Utc> },
    /// An inventory-recovery retry was scheduled; `merchant_notified` is
    /// whether the notification cadence fired this time.
    InventoryRetryScheduled {
        at: DateTime<Utc>,
        merchant_notified: bool,
    },
    /// The retry budget is spent and `on_failure = cancel`: the contract
    /// was marked failed and a cancellation job enqueued.
    CancellationStarted,
    /// The retry budget is spent and `on_failure = skip`: a skip-cycle job
    /// was enqueued and normal billing resumes on the next cycle.
    CycleSkipped,
    /// Nothing to do: the attempt succeeded or the contract no longer
    /// bills.
    Ignored,
}

/// Decides, never executes. All outcomes are job enqueues.
pub struct DunningEngine<'a> {
    ctx: &'a JobContext,
}

impl<'a> DunningEngine<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    /// Routes a failed billing attempt to payment dunning or inventory
    /// recovery.
    #[instrument(skip(self, attempt), fields(contract = %attempt.contract, cycle = attempt.cycle_index))]
    pub async fn triage(&self, attempt: &BillingAttempt) -> Result<DunningDecision, JobError> {
        if attempt.succeeded() {
            tracing::debug!("Attempt succeeded, nothing to dun");
            return Ok(DunningDecision::Ignored);
        }
        let contract = self.ctx.services.contracts.contract(&attempt.contract).await?;
        if contract.is_defunct() {
            tracing::debug!(status = ?contract.status, "Contract no longer bills, ignoring failure");
            return Ok(DunningDecision::Ignored);
        }
        let settings = self.ctx.services.settings.settings(&contract.shop).await?;

        let class = attempt
            .error_code
            .as_ref()
            .map(ErrorCode::class)
            .unwrap_or(ErrorClass::Payment);
        match class {
            ErrorClass::Inventory => self.inventory_recovery(&contract, &settings, attempt).await,
            ErrorClass::Payment => self.payment_dunning(&contract, &settings, attempt).await,
        }
    }

    async fn payment_dunning(
        &self,
        contract: &SubscriptionContract,
        settings: &Settings,
        attempt: &BillingAttempt,
    ) -> Result<DunningDecision, JobError> {
        let contracts = &self.ctx.services.contracts;
        if contract.payment_retries < settings.retry_attempts {
            let count = contracts.record_payment_retry(&contract.id).await?;
            let at = Utc::now() + TimeDelta::days(settings.days_between_retry_attempts.into());
            self.schedule_retry(contract, attempt, at).await?;
            tracing::info!(
                retry = count,
                of = settings.retry_attempts,
                %at,
                "Payment failed, retry scheduled"
            );
            return Ok(DunningDecision::RetryScheduled { at });
        }

        match settings.on_failure {
            OnFailure::Cancel => {
                contracts.mark_failed(&contract.id).await?;
                CancelContractJob::builder()
                    .with_params(CancelParams {
                        contract: contract.id.clone(),
                    })
                    .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
                    .await?;
                tracing::info!("Payment retries exhausted, cancelling contract");
                Ok(DunningDecision::CancellationStarted)
            }
            OnFailure::Skip => {
                contracts.reset_payment_retries(&contract.id).await?;
                SkipCycleJob::builder()
                    .with_params(SkipParams {
                        contract: contract.id.clone(),
                        cycle_index: attempt.cycle_index,
                    })
                    .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
                    .await?;
                tracing::info!(
                    cycle = attempt.cycle_index,
                    "Payment retries exhausted, skipping cycle"
                );
                Ok(DunningDecision::CycleSkipped)
            }
        }
    }

    async fn inventory_recovery(
        &self,
        contract: &SubscriptionContract,
        settings: &Settings,
        attempt: &BillingAttempt,
    ) -> Result<DunningDecision, JobError> {
        let contracts = &self.ctx.services.contracts;
        if contract.inventory_retries < settings.inventory_retry_attempts {
            let count = contracts.record_inventory_retry(&contract.id).await?;
            let at = Utc::now()
                + TimeDelta::days(settings.inventory_days_between_retry_attempts.into());
            self.schedule_retry(contract, attempt, at).await?;

            let now = Utc::now();
            let cadence = settings.inventory_notification_frequency.interval();
            let merchant_notified = contract
                .last_inventory_notification
                .map_or(true, |last| now - last >= cadence);
            if merchant_notified {
                InventoryNotifyJob::builder()
                    .with_params(NotifyParams {
                        contract: contract.id.clone(),
                    })
                    .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
                    .await?;
                contracts
                    .record_inventory_notification(&contract.id, now)
                    .await?;
            }
            tracing::info!(
                retry = count,
                of = settings.inventory_retry_attempts,
                %at,
                merchant_notified,
                "Inventory shortfall, retry scheduled"
            );
            return Ok(DunningDecision::InventoryRetryScheduled {
                at,
                merchant_notified,
            });
        }

        match settings.inventory_on_failure {
            OnFailure::Cancel => {
                contracts.mark_failed(&contract.id).await?;
                CancelContractJob::builder()
                    .with_params(CancelParams {
                        contract: contract.id.clone(),
                    })
                    .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
                    .await?;
                tracing::info!("Inventory retries exhausted, cancelling contract");
                Ok(DunningDecision::CancellationStarted)
            }
            OnFailure::Skip => {
                contracts.reset_inventory_retries(&contract.id).await?;
                SkipCycleJob::builder()
                    .with_params(SkipParams {
                        contract: contract.id.clone(),
                        cycle_index: attempt.cycle_index,
                    })
                    .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
                    .await?;
                tracing::info!(
                    cycle = attempt.cycle_index,
                    "Inventory retries exhausted, skipping cycle"
                );
                Ok(DunningDecision::CycleSkipped)
            }
        }
    }

    async fn schedule_retry(
        &self,
        contract: &SubscriptionContract,
        attempt: &BillingAttempt,
        at: DateTime<Utc>,
    ) -> Result<(), JobError> {
        ChargeCycleJob::builder()
            .with_params(ChargeParams {
                contract: contract.id.clone(),
                cycle_index: attempt.cycle_index,
                allow_overselling: false,
            })
            .schedule_at(at)
            .enqueue_to(self.ctx.scheduler.as_ref(), contract.shop.clone())
            .await?;
        Ok(())
    }

    /// The billing-attempt-success signal: resets both failure streaks and
    /// restores a dunning-induced `Failed` contract to `Active`.
    #[instrument(skip(self))]
    pub async fn billing_succeeded(
        &self,
        contract_id: &crate::model::ContractId,
    ) -> Result<(), JobError> {
        let contracts = &self.ctx.services.contracts;
        contracts.reset_payment_retries(contract_id).await?;
        contracts.reset_inventory_retries(contract_id).await?;
        let contract = contracts.contract(contract_id).await?;
        if contract.status == ContractStatus::Failed {
            contracts.restore_active(contract_id).await?;
            tracing::info!(%contract_id, "Billing recovered, contract restored to active");
        }
        Ok(())
    }
}
