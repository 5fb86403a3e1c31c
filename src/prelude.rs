//! Everything needed to embed the engine, in one import.

pub use crate::backoff::{BackoffStrategy, Jitter};
pub use crate::job::{
    queues, ApiError, JobContext, JobEnvelope, JobError, JobHandler, Queue, Services,
};
pub use crate::jobs::engine_registry;
pub use crate::model::{
    BillingAttempt, BillingCycle, ContractId, ContractStatus, ErrorCode, OnFailure, Settings,
    ShopId, SubscriptionContract,
};
pub use crate::retry::RetryPolicy;
pub use crate::scheduler::queue::{MemoryQueue, QueueWorker};
pub use crate::scheduler::{EnqueueError, Scheduler};
pub use crate::store::{
    ChargeClient, ChargeOptions, ClaimOutcome, ContractMutator, ContractStore, MerchantNotifier,
    MutationError, SettingsStore, StoreError, UserError,
};
pub use crate::webhook::{route, WebhookEvent};
pub use crate::{Engine, RebillError};
