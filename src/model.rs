//! Domain model for subscription contracts and their billing state.

use std::fmt::Display;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a merchant shop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(String);

impl ShopId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ShopId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ShopId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ShopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a subscription contract, owned by the commerce platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContractId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ContractId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a billing attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingAttemptId(String);

impl From<&str> for BillingAttemptId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for BillingAttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal action applied once a retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Cancel the contract.
    Cancel,
    /// Skip past the current cycle and resume billing on the next one.
    Skip,
}

/// How often the merchant is alerted while inventory retries continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationFrequency {
    Weekly,
    Monthly,
}

impl NotificationFrequency {
    pub fn interval(&self) -> TimeDelta {
        match self {
            Self::Weekly => TimeDelta::days(7),
            Self::Monthly => TimeDelta::days(30),
        }
    }
}

/// Per-shop dunning configuration, owned by the shop configuration store.
///
/// Read-only from the engine's perspective: created at onboarding and
/// mutated only by the merchant configuration UI. The payment and inventory
/// triples are independent budgets; neither consumes the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub retry_attempts: u32,
    pub days_between_retry_attempts: u32,
    pub on_failure: OnFailure,
    pub inventory_retry_attempts: u32,
    pub inventory_days_between_retry_attempts: u32,
    pub inventory_on_failure: OnFailure,
    pub inventory_notification_frequency: NotificationFrequency,
}

/// Status of a subscription contract.
///
/// `Failed` is transient: it is only reachable after exhausting payment
/// retries and only exitable via `Cancelled` or back to `Active` when a
/// later billing attempt succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
    Failed,
}

/// A subscription contract as the engine sees it.
///
/// `payment_retries` and `inventory_retries` are explicit per-contract
/// failure-streak counters so a streak survives process restarts and
/// delayed queue delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionContract {
    pub id: ContractId,
    pub shop: ShopId,
    pub status: ContractStatus,
    pub current_cycle_index: u32,
    pub payment_retries: u32,
    pub inventory_retries: u32,
    pub last_inventory_notification: Option<DateTime<Utc>>,
}

impl SubscriptionContract {
    /// A contract that no longer bills: charge jobs for it no-op at
    /// execution time rather than relying on queue-level cancellation.
    pub fn is_defunct(&self) -> bool {
        matches!(self.status, ContractStatus::Cancelled | ContractStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failure,
}

/// The immutable record of one charge submission.
///
/// Produced by the billing-cycle charge step, consumed by the dunning
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAttempt {
    pub id: BillingAttemptId,
    pub contract: ContractId,
    pub cycle_index: u32,
    pub status: AttemptStatus,
    pub error_code: Option<ErrorCode>,
}

impl BillingAttempt {
    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// One scheduled recurrence of a contract's charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub cycle_index: u32,
    pub expected_date: DateTime<Utc>,
    pub skipped: bool,
}

/// Which dunning path a failed attempt routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Payment,
    Inventory,
}

/// The provider-reported reason a billing attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(String);

impl ErrorCode {
    pub const INSUFFICIENT_INVENTORY: &'static str = "insufficient_inventory";
    pub const INVENTORY_ALLOCATIONS_NOT_FOUND: &'static str = "inventory_allocations_not_found";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inventory-class codes route to inventory recovery; everything else
    /// is payment dunning.
    pub fn class(&self) -> ErrorClass {
        match self.0.as_str() {
            Self::INSUFFICIENT_INVENTORY | Self::INVENTORY_ALLOCATIONS_NOT_FOUND => {
                ErrorClass::Inventory
            }
            _ => ErrorClass::Payment,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_codes_are_classed_apart_from_payment_codes() {
        assert_eq!(
            ErrorCode::from(ErrorCode::INSUFFICIENT_INVENTORY).class(),
            ErrorClass::Inventory
        );
        assert_eq!(
            ErrorCode::from(ErrorCode::INVENTORY_ALLOCATIONS_NOT_FOUND).class(),
            ErrorClass::Inventory
        );
        assert_eq!(ErrorCode::from("card_declined").class(), ErrorClass::Payment);
        assert_eq!(ErrorCode::from("expired_payment_method").class(), ErrorClass::Payment);
    }

    #[test]
    fn settings_round_trip() {
        let settings = Settings {
            retry_attempts: 3,
            days_between_retry_attempts: 1,
            on_failure: OnFailure::Cancel,
            inventory_retry_attempts: 2,
            inventory_days_between_retry_attempts: 7,
            inventory_on_failure: OnFailure::Skip,
            inventory_notification_frequency: NotificationFrequency::Monthly,
        };
        let encoded = serde_json::to_string(&settings).unwrap();
        assert_eq!(serde_json::from_str::<Settings>(&encoded).unwrap(), settings);
    }

    #[test]
    fn cancelled_and_expired_contracts_are_defunct() {
        let mut contract = SubscriptionContract {
            id: "c-1".into(),
            shop: "shop-1".into(),
            status: ContractStatus::Active,
            current_cycle_index: 0,
            payment_retries: 0,
            inventory_retries: 0,
            last_inventory_notification: None,
        };
        assert!(!contract.is_defunct());
        contract.status = ContractStatus::Cancelled;
        assert!(contract.is_defunct());
        contract.status = ContractStatus::Expired;
        assert!(contract.is_defunct());
        contract.status = ContractStatus::Failed;
        assert!(!contract.is_defunct());
    }
}
