//! The closed set of jobs the engine runs.
//!
//! Each job is a unit struct with typed, JSON-round-trippable parameters.
//! Together they form the whole data flow: a fan-out trigger enqueues
//! charge jobs, a failed charge enqueues the dunning starter, and the
//! dunning engine answers with retry, notification, skip or cancel jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::BillingCycleScheduler;
use crate::dunning::DunningEngine;
use crate::job::registry::JobRegistry;
use crate::job::{queues, JobContext, JobError, JobHandler};
use crate::model::{BillingAttempt, ContractId, ShopId};
use crate::store::{ChargeOptions, ClaimOutcome};

/// A registry with every engine job registered, ready to hand to a worker.
pub fn engine_registry() -> JobRegistry {
    JobRegistry::new()
        .register::<ChargeCycleJob>()
        .register::<StartDunningJob>()
        .register::<CancelContractJob>()
        .register::<SkipCycleJob>()
        .register::<InventoryNotifyJob>()
        .register::<BillingFanOutJob>()
        .register::<BillingSucceededJob>()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeParams {
    pub contract: ContractId,
    pub cycle_index: u32,
    #[serde(default)]
    pub allow_overselling: bool,
}

/// Charges one billing cycle of one contract.
///
/// Idempotent under duplicate delivery: the `(contract, cycle)` claim is
/// taken before any money moves, and a contract that stopped billing since
/// the job was enqueued is detected here and no-oped.
pub struct ChargeCycleJob;

#[async_trait]
impl JobHandler for ChargeCycleJob {
    type Params = ChargeParams;
    const NAME: &'static str = "billing.charge_cycle";
    const QUEUE: &'static str = queues::BILLING;

    async fn perform(
        ctx: &JobContext,
        shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        let services = &ctx.services;
        let contract = services.contracts.contract(&params.contract).await?;
        if contract.is_defunct() {
            tracing::debug!(
                contract = %params.contract,
                status = ?contract.status,
                "Contract no longer bills, dropping charge"
            );
            return Ok(());
        }

        match services
            .contracts
            .claim_cycle(&params.contract, params.cycle_index)
            .await?
        {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyBilled => {
                tracing::debug!(
                    contract = %params.contract,
                    cycle = params.cycle_index,
                    "Cycle already billed, dropping duplicate delivery"
                );
                return Ok(());
            }
            ClaimOutcome::InFlight => {
                tracing::debug!(
                    contract = %params.contract,
                    cycle = params.cycle_index,
                    "Charge already in flight elsewhere, dropping duplicate delivery"
                );
                return Ok(());
            }
        }

        let outcome = services
            .charges
            .charge_cycle(
                &params.contract,
                params.cycle_index,
                ChargeOptions {
                    allow_overselling: params.allow_overselling,
                },
            )
            .await;

        match outcome {
            Ok(attempt) if attempt.succeeded() => {
                services
                    .contracts
                    .mark_cycle_billed(&params.contract, params.cycle_index)
                    .await?;
                BillingSucceededJob::builder()
                    .with_params(SucceededParams {
                        contract: params.contract.clone(),
                    })
                    .enqueue_to(ctx.scheduler.as_ref(), shop.clone())
                    .await?;
                Ok(())
            }
            Ok(attempt) => {
                services
                    .contracts
                    .release_cycle(&params.contract, params.cycle_index)
                    .await?;
                tracing::debug!(
                    contract = %params.contract,
                    cycle = params.cycle_index,
                    error_code = ?attempt.error_code,
                    "Charge declined, starting dunning"
                );
                StartDunningJob::builder()
                    .with_params(DunningParams { attempt })
                    .enqueue_to(ctx.scheduler.as_ref(), shop.clone())
                    .await?;
                Ok(())
            }
            Err(error) => {
                // Release the claim so a redelivery can charge again.
                services
                    .contracts
                    .release_cycle(&params.contract, params.cycle_index)
                    .await?;
                Err(error.into())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningParams {
    pub attempt: BillingAttempt,
}

/// Hands a failed billing attempt to the dunning engine.
pub struct StartDunningJob;

#[async_trait]
impl JobHandler for StartDunningJob {
    type Params = DunningParams;
    const NAME: &'static str = "billing.start_dunning";
    const QUEUE: &'static str = queues::BILLING;

    async fn perform(
        ctx: &JobContext,
        _shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        DunningEngine::new(ctx).triage(&params.attempt).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    pub contract: ContractId,
}

/// Terminal dunning action: cancel the contract on the platform.
pub struct CancelContractJob;

#[async_trait]
impl JobHandler for CancelContractJob {
    type Params = CancelParams;
    const NAME: &'static str = "contracts.cancel";

    async fn perform(
        ctx: &JobContext,
        _shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        ctx.services.mutations.cancel(&params.contract).await?;
        tracing::info!(contract = %params.contract, "Contract cancelled");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipParams {
    pub contract: ContractId,
    pub cycle_index: u32,
}

/// Terminal dunning action: skip the failed cycle and keep billing.
pub struct SkipCycleJob;

#[async_trait]
impl JobHandler for SkipCycleJob {
    type Params = SkipParams;
    const NAME: &'static str = "contracts.skip_cycle";

    async fn perform(
        ctx: &JobContext,
        _shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        ctx.services
            .mutations
            .skip_cycle(&params.contract, params.cycle_index)
            .await?;
        tracing::info!(
            contract = %params.contract,
            cycle = params.cycle_index,
            "Cycle skipped, billing resumes next cycle"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyParams {
    pub contract: ContractId,
}

/// Alerts the merchant that inventory recovery is still retrying.
pub struct InventoryNotifyJob;

#[async_trait]
impl JobHandler for InventoryNotifyJob {
    type Params = NotifyParams;
    const NAME: &'static str = "notifications.inventory_failure";

    async fn perform(
        ctx: &JobContext,
        shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        ctx.services
            .notifier
            .inventory_failure(shop, &params.contract)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutParams {
    pub window: DateTime<Utc>,
}

/// Runs the billing-cycle fan-out for one shop.
pub struct BillingFanOutJob;

#[async_trait]
impl JobHandler for BillingFanOutJob {
    type Params = FanOutParams;
    const NAME: &'static str = "billing.fan_out";
    const QUEUE: &'static str = queues::BILLING;

    async fn perform(
        ctx: &JobContext,
        shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        BillingCycleScheduler::new(ctx).run(shop, params.window).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SucceededParams {
    pub contract: ContractId,
}

/// The billing-attempt-success signal: clears the contract's dunning state.
pub struct BillingSucceededJob;

#[async_trait]
impl JobHandler for BillingSucceededJob {
    type Params = SucceededParams;
    const NAME: &'static str = "billing.succeeded";
    const QUEUE: &'static str = queues::BILLING;

    async fn perform(
        ctx: &JobContext,
        _shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError> {
        DunningEngine::new(ctx).billing_succeeded(&params.contract).await
    }
}
