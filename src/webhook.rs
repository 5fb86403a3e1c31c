//! Inbound platform webhooks, translated into engine jobs.
//!
//! The HTTP surface itself lives outside this crate; whatever receives the
//! request hands the verified event here. Routing only enqueues, so webhook
//! handling stays fast and the real work happens under the queue's retry
//! policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobHandler;
use crate::jobs::{
    BillingFanOutJob, BillingSucceededJob, FanOutParams, StartDunningJob, SucceededParams,
};
use crate::model::{BillingAttempt, ContractId, ShopId};
use crate::scheduler::{EnqueueError, Scheduler};

/// Webhook topics the engine subscribes to.
pub mod topics {
    pub const ATTEMPT_FAILURE: &str = "subscription_billing_attempts/failure";
    pub const ATTEMPT_SUCCESS: &str = "subscription_billing_attempts/success";
    pub const CYCLES_RUN: &str = "subscription_billing_cycles/run";
}

/// A verified webhook delivery from the commerce platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub shop: ShopId,
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SuccessPayload {
    contract: ContractId,
}

#[derive(Debug, Deserialize)]
struct CyclesRunPayload {
    window: Option<DateTime<Utc>>,
}

/// Enqueues the job a webhook event maps to.
///
/// A payload that fails to decode is logged and dropped rather than
/// propagated: the platform redelivers webhooks on error responses, and a
/// malformed payload will be malformed on every redelivery. Unknown topics
/// are dropped silently since subscription changes roll out ahead of code.
pub async fn route(event: WebhookEvent, scheduler: &dyn Scheduler) -> Result<(), EnqueueError> {
    match event.topic.as_str() {
        topics::ATTEMPT_FAILURE => {
            let attempt: BillingAttempt = match serde_json::from_value(event.payload) {
                Ok(attempt) => attempt,
                Err(error) => return drop_malformed(&event.topic, &event.shop, error),
            };
            StartDunningJob::builder()
                .with_params(crate::jobs::DunningParams { attempt })
                .enqueue_to(scheduler, event.shop)
                .await
        }
        topics::ATTEMPT_SUCCESS => {
            let payload: SuccessPayload = match serde_json::from_value(event.payload) {
                Ok(payload) => payload,
                Err(error) => return drop_malformed(&event.topic, &event.shop, error),
            };
            BillingSucceededJob::builder()
                .with_params(SucceededParams {
                    contract: payload.contract,
                })
                .enqueue_to(scheduler, event.shop)
                .await
        }
        topics::CYCLES_RUN => {
            let payload: CyclesRunPayload = match serde_json::from_value(event.payload) {
                Ok(payload) => payload,
                Err(error) => return drop_malformed(&event.topic, &event.shop, error),
            };
            BillingFanOutJob::builder()
                .with_params(FanOutParams {
                    window: payload.window.unwrap_or_else(Utc::now),
                })
                .enqueue_to(scheduler, event.shop)
                .await
        }
        other => {
            tracing::debug!(topic = other, shop = %event.shop, "Ignoring unhandled webhook topic");
            Ok(())
        }
    }
}

fn drop_malformed(
    topic: &str,
    shop: &ShopId,
    error: serde_json::Error,
) -> Result<(), EnqueueError> {
    tracing::error!(topic, %shop, %error, "Dropping webhook with malformed payload");
    Ok(())
}
