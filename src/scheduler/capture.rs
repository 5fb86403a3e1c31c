//! A scheduler that records jobs without executing them.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::job::{JobEnvelope, JobHandler};

use super::{EnqueueError, Scheduler};

/// Records every enqueued job for later assertions. Nothing ever runs.
///
/// # Example
///
/// ```ignore
/// let capture = CaptureScheduler::new();
/// engine_under_test(&capture).await;
/// assert_enqueued!(2 jobs, to: capture, job: ChargeCycleJob);
/// ```
#[derive(Clone, Default)]
pub struct CaptureScheduler {
    jobs: Arc<RwLock<Vec<JobEnvelope>>>,
}

impl CaptureScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope enqueued so far, in order.
    pub fn enqueued(&self) -> Vec<JobEnvelope> {
        self.jobs.read().expect("capture lock poisoned").clone()
    }

    /// Envelopes enqueued under the given job name.
    pub fn named(&self, name: &str) -> Vec<JobEnvelope> {
        self.enqueued()
            .into_iter()
            .filter(|job| job.name == name)
            .collect()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.named(name).len()
    }

    /// Decoded parameters of every enqueued job of kind `J`.
    pub fn params_for<J>(&self) -> Vec<J::Params>
    where
        J: JobHandler,
        J::Params: DeserializeOwned,
    {
        self.named(J::NAME)
            .into_iter()
            .map(|job| {
                serde_json::from_value(job.params)
                    .expect("captured job parameters failed to decode")
            })
            .collect()
    }

    /// Drains and returns everything captured so far.
    pub fn take(&self) -> Vec<JobEnvelope> {
        std::mem::take(&mut *self.jobs.write().expect("capture lock poisoned"))
    }
}

#[async_trait]
impl Scheduler for CaptureScheduler {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), EnqueueError> {
        self.jobs
            .write()
            .map_err(|_| EnqueueError::Backend("capture lock poisoned".to_owned()))?
            .push(envelope);
        Ok(())
    }
}

/// Asserts on the jobs recorded by a [`CaptureScheduler`].
///
/// ```ignore
/// assert_enqueued!(to: capture, job: CancelContractJob);
/// assert_enqueued!(3 jobs, to: capture, job: ChargeCycleJob);
/// assert_enqueued!(0 jobs, to: capture, job: SkipCycleJob);
/// ```
#[macro_export]
macro_rules! assert_enqueued {
    (to: $capture:expr, job: $job:ty) => {
        $crate::assert_enqueued!(1 jobs, to: $capture, job: $job)
    };
    ($n:literal jobs, to: $capture:expr, job: $job:ty) => {{
        let name = <$job as $crate::job::JobHandler>::NAME;
        let found = $capture.count_named(name);
        assert!(
            found == $n,
            "expected {} enqueued {:?} jobs, found {}\n\nAll captured jobs:\n{:#?}",
            $n,
            name,
            found,
            $capture.enqueued(),
        );
    }};
}

pub use assert_enqueued;
