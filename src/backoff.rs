//! Backoff strategies for the queue backend's retry policy.
//!
//! All constructors and configuration functions are `const`, so a strategy
//! can be part of a policy constant.
//!
//! # Example
//!
//! ```
//! use rebill::backoff::{BackoffStrategy, Jitter};
//! use chrono::TimeDelta;
//!
//! let strategy = BackoffStrategy::exponential(TimeDelta::seconds(2))
//!     .with_max(TimeDelta::seconds(30));
//!
//! assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
//! assert_eq!(strategy.backoff(2), TimeDelta::seconds(4));
//! assert_eq!(strategy.backoff(3), TimeDelta::seconds(8));
//! assert_eq!(strategy.backoff(5), TimeDelta::seconds(30));
//! ```

use chrono::TimeDelta;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Growth {
    /// The same delay on every attempt.
    Constant,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay doubles-and-more: `base ^ attempt`.
    Exponential,
}

/// A random jitter applied on top of a computed backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Added jitter in the range `-delta <= jitter <= delta`.
    Absolute(TimeDelta),
    /// Added jitter as a proportion of the computed backoff.
    Relative(f64),
}

impl Jitter {
    fn apply(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        };
        if milliseconds == 0 {
            return value;
        }
        let jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value + TimeDelta::milliseconds(jitter)
    }
}

/// A backoff schedule: growth curve, optional ceiling, optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy {
    growth: Growth,
    base: TimeDelta,
    max: Option<TimeDelta>,
    jitter: Option<Jitter>,
}

impl BackoffStrategy {
    /// The same `delay` for every attempt.
    pub const fn constant(delay: TimeDelta) -> Self {
        Self {
            growth: Growth::Constant,
            base: delay,
            max: None,
            jitter: None,
        }
    }

    /// `factor * attempt`.
    pub const fn linear(factor: TimeDelta) -> Self {
        Self {
            growth: Growth::Linear,
            base: factor,
            max: None,
            jitter: None,
        }
    }

    /// `base ^ attempt`, in whole seconds.
    pub const fn exponential(base: TimeDelta) -> Self {
        Self {
            growth: Growth::Exponential,
            base,
            max: None,
            jitter: None,
        }
    }

    /// Caps the computed backoff. Jitter is applied after the cap.
    pub const fn with_max(self, max: TimeDelta) -> Self {
        Self {
            max: Some(max),
            ..self
        }
    }

    pub const fn with_jitter(self, jitter: Jitter) -> Self {
        Self {
            jitter: Some(jitter),
            ..self
        }
    }

    /// The delay to wait before the given attempt is retried.
    pub fn backoff(&self, attempt: u16) -> TimeDelta {
        let mut backoff = match self.growth {
            Growth::Constant => self.base,
            Growth::Linear => self.base * attempt.into(),
            Growth::Exponential => TimeDelta::seconds(
                self.base
                    .num_seconds()
                    .checked_pow(attempt.into())
                    .unwrap_or(i64::MAX),
            ),
        };
        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }
        match self.jitter {
            Some(jitter) => jitter.apply(backoff),
            None => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_ignores_the_attempt() {
        let strategy = BackoffStrategy::constant(TimeDelta::seconds(10));
        assert_eq!(strategy.backoff(1), TimeDelta::seconds(10));
        assert_eq!(strategy.backoff(7), TimeDelta::seconds(10));
    }

    #[test]
    fn linear_grows_with_the_attempt_up_to_the_max() {
        let strategy =
            BackoffStrategy::linear(TimeDelta::seconds(10)).with_max(TimeDelta::seconds(40));
        assert_eq!(strategy.backoff(1), TimeDelta::seconds(10));
        assert_eq!(strategy.backoff(3), TimeDelta::seconds(30));
        assert_eq!(strategy.backoff(4), TimeDelta::seconds(40));
        assert_eq!(strategy.backoff(5), TimeDelta::seconds(40));
    }

    #[test]
    fn exponential_doubles_and_saturates() {
        let strategy =
            BackoffStrategy::exponential(TimeDelta::seconds(2)).with_max(TimeDelta::seconds(30));
        assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
        assert_eq!(strategy.backoff(4), TimeDelta::seconds(16));
        assert_eq!(strategy.backoff(6), TimeDelta::seconds(30));
        // large attempts must not overflow
        assert_eq!(strategy.backoff(u16::MAX), TimeDelta::seconds(30));
    }

    #[test]
    fn relative_jitter_stays_within_bounds() {
        let strategy = BackoffStrategy::constant(TimeDelta::seconds(20))
            .with_jitter(Jitter::Relative(0.1));
        for _ in 0..50 {
            let backoff = strategy.backoff(1);
            assert!(backoff >= TimeDelta::seconds(18));
            assert!(backoff <= TimeDelta::seconds(22));
        }
    }

    #[test]
    fn absolute_jitter_stays_within_bounds() {
        let strategy = BackoffStrategy::linear(TimeDelta::seconds(20))
            .with_jitter(Jitter::Absolute(TimeDelta::seconds(5)));
        for _ in 0..50 {
            let backoff = strategy.backoff(1);
            assert!(backoff >= TimeDelta::seconds(15));
            assert!(backoff <= TimeDelta::seconds(25));
        }
    }
}
