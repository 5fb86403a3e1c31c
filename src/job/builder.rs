//! Typed builder for enqueuing a job.

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::ShopId;
use crate::scheduler::{EnqueueError, Scheduler};

use super::{JobEnvelope, JobHandler, Queue};

/// Builds the envelope for one job of kind `J` and hands it to a scheduler.
///
/// # Example
///
/// ```ignore
/// ChargeCycleJob::builder()
///     .with_params(params)
///     .schedule_in(TimeDelta::days(1))
///     .enqueue_to(ctx.scheduler.as_ref(), shop.clone())
///     .await?;
/// ```
pub struct JobBuilder<J: JobHandler> {
    params: Option<J::Params>,
    queue: Option<Queue>,
    scheduled_at: DateTime<Utc>,
}

impl<J: JobHandler> Default for JobBuilder<J> {
    fn default() -> Self {
        Self {
            params: None,
            queue: None,
            scheduled_at: Utc::now(),
        }
    }
}

impl<J: JobHandler> JobBuilder<J> {
    pub fn with_params(self, params: J::Params) -> Self {
        Self {
            params: Some(params),
            ..self
        }
    }

    /// Overrides [`JobHandler::QUEUE`] for this enqueue only.
    pub fn on_queue(self, queue: impl Into<Queue>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..self
        }
    }

    /// Do not deliver before this timestamp.
    pub fn schedule_at(self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at,
            ..self
        }
    }

    pub fn schedule_in(self, delay: TimeDelta) -> Self {
        Self {
            scheduled_at: Utc::now() + delay,
            ..self
        }
    }

    /// Hands the job to the scheduler. Returns once accepted for delivery,
    /// not once executed.
    pub async fn enqueue_to(
        self,
        scheduler: &dyn Scheduler,
        shop: ShopId,
    ) -> Result<(), EnqueueError> {
        scheduler
            .enqueue(JobEnvelope {
                name: J::NAME.to_owned(),
                queue: self.queue.unwrap_or_else(|| J::QUEUE.into()),
                shop,
                params: serde_json::to_value(self.params)?,
                scheduled_at: self.scheduled_at,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use crate::job::{JobContext, JobError};
    use crate::scheduler::capture::CaptureScheduler;

    use super::*;

    struct PingJob;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PingParams {
        note: String,
    }

    #[async_trait]
    impl JobHandler for PingJob {
        type Params = PingParams;
        const NAME: &'static str = "test.ping";
        const QUEUE: &'static str = "webhooks";

        async fn perform(
            _ctx: &JobContext,
            _shop: &ShopId,
            _params: Self::Params,
        ) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builds_envelope_with_handler_defaults() {
        let capture = CaptureScheduler::new();
        let scheduled_at = Utc::now() + TimeDelta::minutes(5);

        PingJob::builder()
            .with_params(PingParams {
                note: "hello".to_owned(),
            })
            .schedule_at(scheduled_at)
            .enqueue_to(&capture, "shop-1".into())
            .await
            .unwrap();

        let jobs = capture.enqueued();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, PingJob::NAME);
        assert_eq!(jobs[0].queue, "webhooks".into());
        assert_eq!(jobs[0].scheduled_at, scheduled_at);
        let params: PingParams = serde_json::from_value(jobs[0].params.clone()).unwrap();
        assert_eq!(params.note, "hello");
    }

    #[tokio::test]
    async fn queue_can_be_overridden_per_enqueue() {
        let capture = CaptureScheduler::new();
        PingJob::builder()
            .with_params(PingParams {
                note: "x".to_owned(),
            })
            .on_queue("billing")
            .enqueue_to(&capture, "shop-1".into())
            .await
            .unwrap();

        assert_eq!(capture.enqueued()[0].queue, "billing".into());
    }
}
