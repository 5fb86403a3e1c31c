//! The explicit retry contract shared by every backend.
//!
//! Rather than leaning on whatever a particular queue's defaults happen to
//! be, retry behavior is a policy object: a maximum number of delivery
//! attempts and a backoff schedule. The inline backend applies the same
//! policy so tests observe the semantics production would.

use chrono::TimeDelta;

use crate::backoff::{BackoffStrategy, Jitter};

/// Delivery-level retry policy for retryable job failures.
///
/// Terminal classification lives on the error itself
/// ([`crate::job::JobError::is_terminal`]); the policy only governs how
/// often an error that may yet succeed is redelivered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u16,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u16, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// The delay before redelivering after the given failed attempt.
    pub fn delay_for(&self, attempt: u16) -> TimeDelta {
        self.backoff.backoff(attempt)
    }

    /// Whether the given attempt was the last one allowed.
    pub fn exhausted(&self, attempt: u16) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Five attempts with exponential backoff from 4 seconds, capped at
    /// seven days, with 10% jitter.
    fn default() -> Self {
        Self::new(
            5,
            BackoffStrategy::exponential(TimeDelta::seconds(4))
                .with_max(TimeDelta::days(7))
                .with_jitter(Jitter::Relative(0.1)),
        )
    }
}
