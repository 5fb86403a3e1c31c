//! The job abstraction: named, serializable units of deferred work.
//!
//! A [`JobEnvelope`] is the wire form of a job: the stable name used for
//! registry lookup, the logical queue it belongs to, the shop it is scoped
//! to, and an opaque JSON payload. Envelopes must round-trip through
//! serialization without loss since the distributed backend transports them
//! as serialized records.
//!
//! A [`JobHandler`] is one kind of job: it declares its name and queue and
//! knows how to perform itself against a [`JobContext`].

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ShopId;
use crate::scheduler::Scheduler;
use crate::store::{
    ChargeClient, ContractMutator, ContractStore, MerchantNotifier, SettingsStore, StoreError,
    UserError,
};

pub mod builder;
pub mod registry;

/// Logical queue names used by the engine's own jobs.
pub mod queues {
    pub const DEFAULT: &str = "default";
    pub const BILLING: &str = "billing";
    pub const WEBHOOKS: &str = "webhooks";
}

/// A logical queue partition.
///
/// Delivery across queues is independent and ordering is not guaranteed
/// between jobs, whichever queue they are on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Queue(String);

impl Queue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Queue {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Queue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The serialized form of a job handed to a [`Scheduler`].
///
/// This is what a distributed backend stores and later delivers back to a
/// worker. `scheduled_at` is a "do not deliver before" timestamp which the
/// backend must honor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub name: String,
    pub queue: Queue,
    pub shop: ShopId,
    pub params: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
}

/// A single kind of job the engine can run.
///
/// Implementations are unit structs; all state travels in `Params`, which
/// must survive a round-trip through JSON for distributed transport.
///
/// The motivation for a static `NAME` rather than the type name is to let
/// the Rust type be renamed without breaking jobs already sitting in a
/// queue.
#[async_trait::async_trait]
pub trait JobHandler {
    /// The typed parameters for this job, scoped to one shop.
    type Params: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable identifier used for registry lookup and logging.
    const NAME: &'static str;

    /// The logical queue this job is dispatched on.
    const QUEUE: &'static str = queues::DEFAULT;

    async fn perform(
        ctx: &JobContext,
        shop: &ShopId,
        params: Self::Params,
    ) -> Result<(), JobError>;

    fn builder() -> builder::JobBuilder<Self>
    where
        Self: Sized,
    {
        Default::default()
    }
}

/// The collaborators a job may reach during [`JobHandler::perform`].
///
/// Jobs communicate exclusively by enqueuing further jobs through
/// `scheduler`; there are no synchronous calls between engine components.
pub struct JobContext {
    pub scheduler: Arc<dyn Scheduler>,
    pub services: Services,
}

impl JobContext {
    pub fn new(scheduler: Arc<dyn Scheduler>, services: Services) -> Self {
        Self {
            scheduler,
            services,
        }
    }
}

/// External collaborators, accessed through narrow interfaces only.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<dyn SettingsStore>,
    pub contracts: Arc<dyn ContractStore>,
    pub mutations: Arc<dyn ContractMutator>,
    pub charges: Arc<dyn ChargeClient>,
    pub notifier: Arc<dyn MerchantNotifier>,
}

/// Upstream commerce API statuses for which retrying can never succeed.
///
/// Payment-required, forbidden, not-found and locked. Everything else,
/// including rate limits and transient 5xx, stays retryable.
pub const TERMINAL_STATUSES: [u16; 4] = [402, 403, 404, 423];

/// An error response from the upstream commerce API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upstream api returned status {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATUSES.contains(&self.status)
    }
}

/// A failure raised while performing a job.
///
/// Classification is the single most important contract in the engine:
/// terminal errors are swallowed by the run wrapper (no further deliveries),
/// retryable ones propagate unchanged so the backend's retry policy takes
/// over, and business-rule rejections end the run without retry since a
/// deterministic rejection cannot be retried into success.
#[derive(Debug, Error)]
pub enum JobError {
    /// The shop's access credentials are gone. Terminal.
    #[error("no session found for shop {0}")]
    SessionNotFound(ShopId),
    /// The upstream API rejected the call; terminal iff the status is in
    /// [`TERMINAL_STATUSES`].
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A mutation was rejected by business rules with a structured
    /// user-error list. Never retried, surfaced in the run outcome.
    #[error("rejected by business rules: {}", format_user_errors(.0))]
    Business(Vec<UserError>),
    /// The job's parameters failed to encode or decode. Terminal: the same
    /// payload would fail on every delivery.
    #[error("failed to encode or decode job parameters: {0}")]
    Codec(#[from] serde_json::Error),
    /// No handler registered under the delivered name. Terminal.
    #[error("unknown job {0:?}")]
    UnknownJob(String),
    /// The settings or contract store failed. Retryable.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An unclassified failure. Retryable by default.
    #[error("{0}")]
    Other(String),
}

impl JobError {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::SessionNotFound(_) | Self::Codec(_) | Self::UnknownJob(_) => true,
            Self::Api(error) => error.is_terminal(),
            Self::Business(_) | Self::Store(_) | Self::Other(_) => false,
        }
    }
}

fn format_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn envelope_round_trips_through_serialization() {
        let envelope = JobEnvelope {
            name: "billing.charge_cycle".to_owned(),
            queue: queues::BILLING.into(),
            shop: ShopId::from("shop-1"),
            params: serde_json::json!({"contract": "c-1", "cycle_index": 4}),
            scheduled_at: Utc::now(),
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: JobEnvelope = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.name, envelope.name);
        assert_eq!(decoded.queue, envelope.queue);
        assert_eq!(decoded.shop, envelope.shop);
        assert_eq!(decoded.params, envelope.params);
        assert_eq!(decoded.scheduled_at, envelope.scheduled_at);
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        for status in TERMINAL_STATUSES {
            assert!(JobError::Api(ApiError::new(status, "rejected")).is_terminal());
        }
    }

    #[test]
    fn transient_statuses_are_retryable() {
        for status in [429, 500, 502, 503] {
            assert!(!JobError::Api(ApiError::new(status, "try later")).is_terminal());
        }
    }

    #[test]
    fn session_and_codec_failures_are_terminal() {
        assert!(JobError::SessionNotFound(ShopId::from("shop-1")).is_terminal());
        assert!(JobError::UnknownJob("nope".to_owned()).is_terminal());
        let codec = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(JobError::Codec(codec).is_terminal());
    }

    #[test]
    fn business_failures_are_not_terminal() {
        let error = JobError::Business(vec![UserError::new(
            None,
            "cannot pause contract with future cycle edits",
        )]);
        assert_matches!(error.is_terminal(), false);
    }
}
