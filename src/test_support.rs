//! Hand-rolled collaborator stubs shared across test modules.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::job::{ApiError, Services};
use crate::model::{
    AttemptStatus, BillingAttempt, BillingCycle, ContractId, ContractStatus, ErrorCode,
    NotificationFrequency, OnFailure, Settings, ShopId, SubscriptionContract,
};
use crate::store::memory::{InMemoryContracts, InMemorySettings};
use crate::store::{ChargeClient, ChargeOptions, ContractMutator, MerchantNotifier, MutationError, UserError};

/// A [`ChargeClient`] returning programmed outcomes, defaulting to success.
#[derive(Clone, Default)]
pub(crate) struct ProgrammedCharges {
    outcomes: Arc<Mutex<Vec<Result<BillingAttempt, ApiError>>>>,
    calls: Arc<Mutex<Vec<(ContractId, u32, ChargeOptions)>>>,
}

impl ProgrammedCharges {
    pub(crate) fn push_outcome(&self, outcome: Result<BillingAttempt, ApiError>) {
        self.outcomes.lock().unwrap().insert(0, outcome);
    }

    pub(crate) fn calls(&self) -> Vec<(ContractId, u32, ChargeOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChargeClient for ProgrammedCharges {
    async fn charge_cycle(
        &self,
        contract: &ContractId,
        cycle_index: u32,
        options: ChargeOptions,
    ) -> Result<BillingAttempt, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((contract.clone(), cycle_index, options));
        self.outcomes.lock().unwrap().pop().unwrap_or_else(|| {
            Ok(successful_attempt(contract.clone(), cycle_index))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MutationCall {
    Pause(ContractId),
    Resume(ContractId),
    Cancel(ContractId),
    Skip(ContractId, u32),
}

/// A [`ContractMutator`] recording calls, succeeding unless told otherwise.
#[derive(Clone, Default)]
pub(crate) struct RecordingMutator {
    calls: Arc<Mutex<Vec<MutationCall>>>,
    rejections: Arc<Mutex<Vec<Vec<UserError>>>>,
}

impl RecordingMutator {
    pub(crate) fn calls(&self) -> Vec<MutationCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn reject_next(&self, errors: Vec<UserError>) {
        self.rejections.lock().unwrap().push(errors);
    }

    fn record(&self, call: MutationCall) -> Result<(), MutationError> {
        self.calls.lock().unwrap().push(call);
        match self.rejections.lock().unwrap().pop() {
            Some(errors) => Err(MutationError::Rejected(errors)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContractMutator for RecordingMutator {
    async fn pause(&self, id: &ContractId) -> Result<(), MutationError> {
        self.record(MutationCall::Pause(id.clone()))
    }
    async fn resume(&self, id: &ContractId) -> Result<(), MutationError> {
        self.record(MutationCall::Resume(id.clone()))
    }
    async fn cancel(&self, id: &ContractId) -> Result<(), MutationError> {
        self.record(MutationCall::Cancel(id.clone()))
    }
    async fn skip_cycle(&self, id: &ContractId, cycle_index: u32) -> Result<(), MutationError> {
        self.record(MutationCall::Skip(id.clone(), cycle_index))
    }
}

/// A [`MerchantNotifier`] recording notifications.
#[derive(Clone, Default)]
pub(crate) struct RecordingNotifier {
    notified: Arc<Mutex<Vec<(ShopId, ContractId)>>>,
}

impl RecordingNotifier {
    pub(crate) fn notifications(&self) -> Vec<(ShopId, ContractId)> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl MerchantNotifier for RecordingNotifier {
    async fn inventory_failure(
        &self,
        shop: &ShopId,
        contract: &ContractId,
    ) -> Result<(), ApiError> {
        self.notified
            .lock()
            .unwrap()
            .push((shop.clone(), contract.clone()));
        Ok(())
    }
}

pub(crate) struct TestStores {
    pub(crate) settings: InMemorySettings,
    pub(crate) contracts: InMemoryContracts,
    pub(crate) charges: ProgrammedCharges,
    pub(crate) mutations: RecordingMutator,
    pub(crate) notifier: RecordingNotifier,
}

pub(crate) fn services() -> (Services, TestStores) {
    let stores = TestStores {
        settings: InMemorySettings::new(),
        contracts: InMemoryContracts::new(),
        charges: ProgrammedCharges::default(),
        mutations: RecordingMutator::default(),
        notifier: RecordingNotifier::default(),
    };
    let services = Services {
        settings: Arc::new(stores.settings.clone()),
        contracts: Arc::new(stores.contracts.clone()),
        mutations: Arc::new(stores.mutations.clone()),
        charges: Arc::new(stores.charges.clone()),
        notifier: Arc::new(stores.notifier.clone()),
    };
    (services, stores)
}

pub(crate) fn settings(retry_attempts: u32, days_between: u32, on_failure: OnFailure) -> Settings {
    Settings {
        retry_attempts,
        days_between_retry_attempts: days_between,
        on_failure,
        inventory_retry_attempts: 2,
        inventory_days_between_retry_attempts: 3,
        inventory_on_failure: OnFailure::Skip,
        inventory_notification_frequency: NotificationFrequency::Weekly,
    }
}

pub(crate) fn contract(id: &str, shop: &str) -> SubscriptionContract {
    SubscriptionContract {
        id: id.into(),
        shop: shop.into(),
        status: ContractStatus::Active,
        current_cycle_index: 0,
        payment_retries: 0,
        inventory_retries: 0,
        last_inventory_notification: None,
    }
}

pub(crate) fn cycle(cycle_index: u32, expected_date: chrono::DateTime<chrono::Utc>) -> BillingCycle {
    BillingCycle {
        cycle_index,
        expected_date,
        skipped: false,
    }
}

pub(crate) fn failed_attempt(contract: &str, cycle_index: u32, code: &str) -> BillingAttempt {
    BillingAttempt {
        id: "attempt-1".into(),
        contract: contract.into(),
        cycle_index,
        status: AttemptStatus::Failure,
        error_code: Some(ErrorCode::from(code)),
    }
}

pub(crate) fn successful_attempt(contract: ContractId, cycle_index: u32) -> BillingAttempt {
    BillingAttempt {
        id: "attempt-ok".into(),
        contract,
        cycle_index,
        status: AttemptStatus::Success,
        error_code: None,
    }
}
