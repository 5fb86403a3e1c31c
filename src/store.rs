//! Narrow interfaces to the external collaborators backing the engine.
//!
//! The engine never owns persistence: settings, contracts and cycles live
//! in the commerce platform and are reached through the traits below.
//! Status transitions and cycle state go through explicit calls; nothing is
//! mutated in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::ApiError;
use crate::model::{
    BillingAttempt, ContractId, Settings, ShopId, SubscriptionContract,
};

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no settings found for shop {0}")]
    SettingsNotFound(ShopId),
    #[error("contract {0} not found")]
    ContractNotFound(ContractId),
    #[error("cycle {cycle_index} not found on contract {contract}")]
    CycleNotFound { contract: ContractId, cycle_index: u32 },
    #[error("store in a bad state")]
    BadState,
}

/// Read interface to per-shop dunning configuration. The engine never
/// writes settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self, shop: &ShopId) -> Result<Settings, StoreError>;
}

/// Outcome of the conditional claim on a `(contract, cycle)` pair.
///
/// The claim is the idempotency anchor for charging: a charge job must
/// observe `Claimed` before submitting payment, so duplicate delivery of
/// the same fan-out trigger cannot double-charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The cycle was unbilled and is now held by this execution.
    Claimed,
    /// A successful charge already landed for this cycle.
    AlreadyBilled,
    /// Another delivery holds the claim right now.
    InFlight,
}

/// A contract due for billing in the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCharge {
    pub contract: ContractId,
    pub shop: ShopId,
    pub cycle_index: u32,
}

/// Read/write interface over contract billing state.
///
/// The conditional cycle operations must be safe under concurrent delivery:
/// `claim_cycle` is a check-and-mark under one lock (or one conditional
/// write at the data layer), never a separate read followed by a write.
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn contract(&self, id: &ContractId) -> Result<SubscriptionContract, StoreError>;

    /// Contracts of this shop whose next unbilled cycle falls inside the
    /// window ending at `window`.
    async fn due_contracts(
        &self,
        shop: &ShopId,
        window: DateTime<Utc>,
    ) -> Result<Vec<DueCharge>, StoreError>;

    async fn claim_cycle(
        &self,
        id: &ContractId,
        cycle_index: u32,
    ) -> Result<ClaimOutcome, StoreError>;

    async fn mark_cycle_billed(&self, id: &ContractId, cycle_index: u32)
        -> Result<(), StoreError>;

    /// Returns a claimed cycle to the unbilled state after a failed charge
    /// so a scheduled retry can claim it again.
    async fn release_cycle(&self, id: &ContractId, cycle_index: u32) -> Result<(), StoreError>;

    /// Bumps the payment failure-streak counter, returning the new count.
    async fn record_payment_retry(&self, id: &ContractId) -> Result<u32, StoreError>;

    /// Bumps the inventory failure-streak counter, returning the new count.
    async fn record_inventory_retry(&self, id: &ContractId) -> Result<u32, StoreError>;

    async fn reset_payment_retries(&self, id: &ContractId) -> Result<(), StoreError>;

    async fn reset_inventory_retries(&self, id: &ContractId) -> Result<(), StoreError>;

    async fn record_inventory_notification(
        &self,
        id: &ContractId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Marks the contract `Failed` once the payment budget is exhausted
    /// with a pending cancellation.
    async fn mark_failed(&self, id: &ContractId) -> Result<(), StoreError>;

    /// Restores a dunning-induced `Failed` contract to `Active`.
    async fn restore_active(&self, id: &ContractId) -> Result<(), StoreError>;
}

/// A structured business-rule rejection from a contract mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    pub field: Option<String>,
    pub message: String,
}

impl UserError {
    pub fn new(field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            field: field.map(ToOwned::to_owned),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    /// The platform applied its business rules and said no. Retrying will
    /// not change the answer.
    #[error("mutation rejected: {0:?}")]
    Rejected(Vec<UserError>),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<MutationError> for crate::job::JobError {
    fn from(value: MutationError) -> Self {
        match value {
            MutationError::Rejected(errors) => Self::Business(errors),
            MutationError::Api(error) => Self::Api(error),
        }
    }
}

/// Contract lifecycle mutations on the commerce platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractMutator: Send + Sync {
    async fn pause(&self, id: &ContractId) -> Result<(), MutationError>;
    async fn resume(&self, id: &ContractId) -> Result<(), MutationError>;
    async fn cancel(&self, id: &ContractId) -> Result<(), MutationError>;
    async fn skip_cycle(&self, id: &ContractId, cycle_index: u32) -> Result<(), MutationError>;
}

/// Inventory handling when submitting a charge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargeOptions {
    pub allow_overselling: bool,
}

/// The opaque payment service. A transport or API failure comes back as
/// `Err`; a declined charge is an `Ok` attempt with failure status and an
/// error code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChargeClient: Send + Sync {
    async fn charge_cycle(
        &self,
        contract: &ContractId,
        cycle_index: u32,
        options: ChargeOptions,
    ) -> Result<BillingAttempt, ApiError>;
}

/// Merchant alerting while inventory recovery retries continue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MerchantNotifier: Send + Sync {
    async fn inventory_failure(
        &self,
        shop: &ShopId,
        contract: &ContractId,
    ) -> Result<(), ApiError>;
}
