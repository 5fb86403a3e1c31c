//! In-memory store implementations.
//!
//! Provided for tests and local development, in the same spirit as an
//! in-memory queue backend: correct rather than optimized, and not meant
//! for production use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    BillingCycle, ContractId, ContractStatus, Settings, ShopId, SubscriptionContract,
};

use super::{ClaimOutcome, ContractStore, DueCharge, SettingsStore, StoreError};

/// In-memory [`SettingsStore`].
#[derive(Clone, Default)]
pub struct InMemorySettings {
    settings: Arc<RwLock<HashMap<ShopId, Settings>>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shop: ShopId, settings: Settings) {
        self.settings
            .write()
            .expect("settings lock poisoned")
            .insert(shop, settings);
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn settings(&self, shop: &ShopId) -> Result<Settings, StoreError> {
        self.settings
            .read()
            .map_err(|_| StoreError::BadState)?
            .get(shop)
            .cloned()
            .ok_or_else(|| StoreError::SettingsNotFound(shop.clone()))
    }
}

/// Billed state of one cycle, tracked alongside the cycle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Unbilled,
    InFlight,
    Billed,
}

#[derive(Clone)]
struct CycleRecord {
    cycle: BillingCycle,
    state: CycleState,
}

#[derive(Clone)]
struct ContractRecord {
    contract: SubscriptionContract,
    cycles: Vec<CycleRecord>,
}

/// In-memory [`ContractStore`].
///
/// All conditional cycle operations happen under a single write lock, which
/// gives the check-and-mark claim the atomicity the trait requires.
#[derive(Clone, Default)]
pub struct InMemoryContracts {
    records: Arc<RwLock<HashMap<ContractId, ContractRecord>>>,
}

impl InMemoryContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contract: SubscriptionContract) {
        self.records
            .write()
            .expect("contract lock poisoned")
            .insert(
                contract.id.clone(),
                ContractRecord {
                    contract,
                    cycles: Vec::new(),
                },
            );
    }

    pub fn add_cycle(&self, id: &ContractId, cycle: BillingCycle) {
        if let Some(record) = self
            .records
            .write()
            .expect("contract lock poisoned")
            .get_mut(id)
        {
            record.cycles.push(CycleRecord {
                cycle,
                state: CycleState::Unbilled,
            });
        }
    }

    /// Snapshot of the stored contract, for assertions.
    pub fn snapshot(&self, id: &ContractId) -> Option<SubscriptionContract> {
        self.records
            .read()
            .expect("contract lock poisoned")
            .get(id)
            .map(|record| record.contract.clone())
    }

    /// Billed state of one cycle, for assertions.
    pub fn cycle_state(&self, id: &ContractId, cycle_index: u32) -> Option<CycleState> {
        self.records
            .read()
            .expect("contract lock poisoned")
            .get(id)
            .and_then(|record| {
                record
                    .cycles
                    .iter()
                    .find(|c| c.cycle.cycle_index == cycle_index)
                    .map(|c| c.state)
            })
    }

    fn with_contract<T>(
        &self,
        id: &ContractId,
        f: impl FnOnce(&mut ContractRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::BadState)?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::ContractNotFound(id.clone()))?;
        f(record)
    }

    fn with_cycle<T>(
        &self,
        id: &ContractId,
        cycle_index: u32,
        f: impl FnOnce(&mut CycleRecord) -> T,
    ) -> Result<T, StoreError> {
        self.with_contract(id, |record| {
            record
                .cycles
                .iter_mut()
                .find(|c| c.cycle.cycle_index == cycle_index)
                .map(f)
                .ok_or(StoreError::CycleNotFound {
                    contract: id.clone(),
                    cycle_index,
                })
        })
    }
}

#[async_trait]
impl ContractStore for InMemoryContracts {
    async fn contract(&self, id: &ContractId) -> Result<SubscriptionContract, StoreError> {
        self.records
            .read()
            .map_err(|_| StoreError::BadState)?
            .get(id)
            .map(|record| record.contract.clone())
            .ok_or_else(|| StoreError::ContractNotFound(id.clone()))
    }

    async fn due_contracts(
        &self,
        shop: &ShopId,
        window: DateTime<Utc>,
    ) -> Result<Vec<DueCharge>, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|_| StoreError::BadState)?
            .values()
            .filter(|record| {
                record.contract.shop == *shop && record.contract.status == ContractStatus::Active
            })
            .filter_map(|record| {
                record
                    .cycles
                    .iter()
                    .filter(|c| c.state == CycleState::Unbilled && !c.cycle.skipped)
                    .min_by_key(|c| c.cycle.cycle_index)
                    .filter(|c| c.cycle.expected_date <= window)
                    .map(|c| DueCharge {
                        contract: record.contract.id.clone(),
                        shop: record.contract.shop.clone(),
                        cycle_index: c.cycle.cycle_index,
                    })
            })
            .collect())
    }

    async fn claim_cycle(
        &self,
        id: &ContractId,
        cycle_index: u32,
    ) -> Result<ClaimOutcome, StoreError> {
        self.with_cycle(id, cycle_index, |cycle| match cycle.state {
            CycleState::Unbilled => {
                cycle.state = CycleState::InFlight;
                ClaimOutcome::Claimed
            }
            CycleState::InFlight => ClaimOutcome::InFlight,
            CycleState::Billed => ClaimOutcome::AlreadyBilled,
        })
    }

    async fn mark_cycle_billed(
        &self,
        id: &ContractId,
        cycle_index: u32,
    ) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            let cycle = record
                .cycles
                .iter_mut()
                .find(|c| c.cycle.cycle_index == cycle_index)
                .ok_or(StoreError::CycleNotFound {
                    contract: id.clone(),
                    cycle_index,
                })?;
            cycle.state = CycleState::Billed;
            record.contract.current_cycle_index =
                record.contract.current_cycle_index.max(cycle_index + 1);
            Ok(())
        })
    }

    async fn release_cycle(&self, id: &ContractId, cycle_index: u32) -> Result<(), StoreError> {
        self.with_cycle(id, cycle_index, |cycle| {
            if cycle.state == CycleState::InFlight {
                cycle.state = CycleState::Unbilled;
            }
        })
    }

    async fn record_payment_retry(&self, id: &ContractId) -> Result<u32, StoreError> {
        self.with_contract(id, |record| {
            record.contract.payment_retries += 1;
            Ok(record.contract.payment_retries)
        })
    }

    async fn record_inventory_retry(&self, id: &ContractId) -> Result<u32, StoreError> {
        self.with_contract(id, |record| {
            record.contract.inventory_retries += 1;
            Ok(record.contract.inventory_retries)
        })
    }

    async fn reset_payment_retries(&self, id: &ContractId) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            record.contract.payment_retries = 0;
            Ok(())
        })
    }

    async fn reset_inventory_retries(&self, id: &ContractId) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            record.contract.inventory_retries = 0;
            Ok(())
        })
    }

    async fn record_inventory_notification(
        &self,
        id: &ContractId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            record.contract.last_inventory_notification = Some(at);
            Ok(())
        })
    }

    async fn mark_failed(&self, id: &ContractId) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            record.contract.status = ContractStatus::Failed;
            Ok(())
        })
    }

    async fn restore_active(&self, id: &ContractId) -> Result<(), StoreError> {
        self.with_contract(id, |record| {
            if record.contract.status == ContractStatus::Failed {
                record.contract.status = ContractStatus::Active;
            }
            Ok(())
        })
    }
}
