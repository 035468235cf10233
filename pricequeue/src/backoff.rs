//! Delays applied before a failed job becomes eligible for dispatch again.
//!
//! By default a failed attempt is requeued immediately: the job goes back to `pending` and the
//! next dispatcher tick may pick it up. A [`RetryPolicy`] can instead be given a [`Strategy`],
//! usually a [`BackoffStrategy`], in which case the requeued job is scheduled in the future.
//!
//! # Example
//!
//! ```
//! # use pricequeue::prelude::*;
//! # use chrono::TimeDelta;
//! let strategy = BackoffStrategy::linear(TimeDelta::seconds(20))
//!     .with_max(TimeDelta::seconds(60))
//!     .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)));
//!
//! assert!(strategy.backoff(1) >= TimeDelta::seconds(10));
//! assert!(strategy.backoff(1) <= TimeDelta::seconds(30));
//! // Note the max here is the max plus max jitter
//! assert!(strategy.backoff(10) >= TimeDelta::seconds(50));
//! assert!(strategy.backoff(10) <= TimeDelta::seconds(70));
//! ```
use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Type that can be used to implement a backoff strategy.
pub trait Strategy: Debug {
    /// Given the number of the attempt that just failed returns the [`TimeDelta`] to wait before
    /// the job should be retried.
    fn backoff(&self, attempt: u16) -> TimeDelta;
}

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// The same delay for every attempt.
    Constant(TimeDelta),
    /// `factor * attempt`.
    Linear(TimeDelta),
    /// `base * 2^(attempt - 1)`.
    Exponential(TimeDelta),
}

impl Curve {
    fn delay(&self, attempt: u16) -> TimeDelta {
        match *self {
            Curve::Constant(delay) => delay,
            Curve::Linear(factor) => factor
                .checked_mul(i32::from(attempt))
                .unwrap_or_else(|| saturated(factor)),
            Curve::Exponential(base) => {
                let factor = 1i32
                    .checked_shl(u32::from(attempt.saturating_sub(1)))
                    .filter(|factor| *factor > 0)
                    .unwrap_or(i32::MAX);
                base.checked_mul(factor).unwrap_or_else(|| saturated(base))
            }
        }
    }
}

/// The bound of the [`TimeDelta`] range on the side of `sign`.
fn saturated(sign: TimeDelta) -> TimeDelta {
    if sign < TimeDelta::zero() {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    }
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter to be added to the backoff in the range `-delta =< jitter =< delta`.
    Absolute(TimeDelta),
    /// A random jitter to be added as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        }
        .abs();
        let jitter = TimeDelta::try_milliseconds(
            rand::thread_rng().gen_range(-milliseconds..=milliseconds),
        )
        .unwrap_or_else(TimeDelta::zero);
        value
            .checked_add(&jitter)
            .unwrap_or_else(|| saturated(jitter))
    }
}

/// Common backoff strategies.
///
/// Three curves are provided, [`BackoffStrategy::constant`], [`BackoffStrategy::linear`] and
/// [`BackoffStrategy::exponential`], each of which can be clamped and modified by a [`Jitter`].
///
/// ```
/// # use pricequeue::prelude::*;
/// # use chrono::TimeDelta;
/// let strategy =
///     BackoffStrategy::exponential(TimeDelta::seconds(2)).with_max(TimeDelta::seconds(30));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
/// assert_eq!(strategy.backoff(2), TimeDelta::seconds(4));
/// assert_eq!(strategy.backoff(3), TimeDelta::seconds(8));
/// assert_eq!(strategy.backoff(4), TimeDelta::seconds(16));
/// assert_eq!(strategy.backoff(5), TimeDelta::seconds(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy {
    curve: Curve,
    max: Option<TimeDelta>,
    min: TimeDelta,
    jitter: Option<Jitter>,
}

impl BackoffStrategy {
    pub const fn new(curve: Curve) -> Self {
        Self {
            curve,
            max: None,
            min: TimeDelta::zero(),
            jitter: None,
        }
    }

    pub const fn constant(delay: TimeDelta) -> Self {
        Self::new(Curve::Constant(delay))
    }

    pub const fn linear(factor: TimeDelta) -> Self {
        Self::new(Curve::Linear(factor))
    }

    pub const fn exponential(base: TimeDelta) -> Self {
        Self::new(Curve::Exponential(base))
    }

    /// Clamps the value produced by the curve to `max`, before jitter is applied.
    pub const fn with_max(mut self, max: TimeDelta) -> Self {
        self.max = Some(max);
        self
    }

    /// Add a minimum value. This can be useful when you have a particularly large jitter and would
    /// like to avoid a delay of less than a given amount.
    pub const fn with_min(mut self, min: TimeDelta) -> Self {
        self.min = min;
        self
    }

    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

impl Strategy for BackoffStrategy {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let mut backoff = self.curve.delay(attempt);
        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }
        if let Some(jitter) = self.jitter {
            backoff = jitter.apply_jitter(backoff);
        }
        backoff.max(self.min)
    }
}

/// Decides when a failed job that has attempts left is dispatched again.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    backoff: Option<Arc<dyn Strategy + Send + Sync>>,
}

impl RetryPolicy {
    /// Failed jobs are eligible again as soon as they are requeued.
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn with_backoff(strategy: impl Strategy + Send + Sync + 'static) -> Self {
        Self {
            backoff: Some(Arc::new(strategy)),
        }
    }

    /// The instant a job whose attempt number `attempt` failed at `now` becomes eligible again.
    pub fn retry_at(&self, now: DateTime<Utc>, attempt: u16) -> DateTime<Utc> {
        match &self.backoff {
            Some(strategy) => now
                .checked_add_signed(strategy.backoff(attempt).max(TimeDelta::zero()))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => now,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_backoff() {
        let delay = TimeDelta::minutes(1);
        let strategy = BackoffStrategy::constant(delay);

        for i in 1..100 {
            assert_eq!(strategy.backoff(i), delay);
        }
    }

    #[test]
    fn constant_backoff_with_absolute_jitter() {
        let delay = TimeDelta::minutes(1);
        let jitter = TimeDelta::seconds(10);
        let strategy = BackoffStrategy::constant(delay).with_jitter(Jitter::Absolute(jitter));

        for i in 1..100 {
            let backoff = strategy.backoff(i);
            assert!(backoff >= delay - jitter);
            assert!(backoff <= delay + jitter);
        }
    }

    #[test]
    fn constant_backoff_with_jitter_min() {
        let delay = TimeDelta::seconds(20);
        let jitter = TimeDelta::seconds(20);
        let min = TimeDelta::seconds(5);
        let strategy = BackoffStrategy::constant(delay)
            .with_jitter(Jitter::Absolute(jitter))
            .with_min(min);

        for i in 1..100 {
            let backoff = strategy.backoff(i);
            assert!(backoff >= min);
            assert!(backoff <= delay + jitter);
        }
    }

    #[test]
    fn linear_backoff() {
        let delay = TimeDelta::minutes(1);
        let strategy = BackoffStrategy::linear(delay);

        for i in 1..100 {
            assert_eq!(strategy.backoff(i), delay * i32::from(i));
        }
    }

    #[test]
    fn linear_backoff_with_relative_jitter() {
        let delay = TimeDelta::minutes(1);
        let strategy = BackoffStrategy::linear(delay).with_jitter(Jitter::Relative(0.1));

        for i in 1..100 {
            let backoff = strategy.backoff(i);
            let jitter = TimeDelta::seconds(6) * i32::from(i);
            assert!(backoff >= delay * i32::from(i) - jitter);
            assert!(backoff <= delay * i32::from(i) + jitter);
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let strategy = BackoffStrategy::exponential(TimeDelta::seconds(3));

        let delays: Vec<_> = (1..=5).map(|i| strategy.backoff(i).num_seconds()).collect();
        assert_eq!(delays, [3, 6, 12, 24, 48]);
    }

    #[test]
    fn exponential_backoff_saturates() {
        let max = TimeDelta::hours(1);
        let strategy = BackoffStrategy::exponential(TimeDelta::minutes(1)).with_max(max);

        for i in 1..u16::MAX {
            assert!(strategy.backoff(i) <= max);
        }
    }

    #[test]
    fn uncapped_exponential_backoff_with_jitter_saturates() {
        let strategy =
            BackoffStrategy::exponential(TimeDelta::days(60)).with_jitter(Jitter::Relative(0.1));

        for i in 1..=40 {
            assert!(strategy.backoff(i) > TimeDelta::zero());
        }
        let policy = RetryPolicy::with_backoff(strategy);
        assert_eq!(policy.retry_at(Utc::now(), 40), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn linear_backoff_saturates() {
        let strategy = BackoffStrategy::linear(TimeDelta::MAX / 2)
            .with_jitter(Jitter::Absolute(TimeDelta::days(1)));

        assert_eq!(BackoffStrategy::linear(TimeDelta::MAX / 2).backoff(3), TimeDelta::MAX);
        assert!(strategy.backoff(u16::MAX) > TimeDelta::MAX / 2);
        assert_eq!(
            BackoffStrategy::linear(TimeDelta::MIN / 2).backoff(3),
            TimeDelta::MIN
        );
    }

    #[test]
    fn immediate_policy_retries_now() {
        let now = Utc::now();
        assert_eq!(RetryPolicy::immediate().retry_at(now, 1), now);
        assert_eq!(RetryPolicy::immediate().retry_at(now, 7), now);
    }

    #[test]
    fn backoff_policy_schedules_later() {
        let now = Utc::now();
        let policy = RetryPolicy::with_backoff(BackoffStrategy::linear(TimeDelta::seconds(30)));

        assert_eq!(policy.retry_at(now, 1), now + TimeDelta::seconds(30));
        assert_eq!(policy.retry_at(now, 2), now + TimeDelta::seconds(60));
    }

    #[test]
    fn negative_backoff_never_schedules_in_the_past() {
        let now = Utc::now();
        let policy = RetryPolicy::with_backoff(BackoffStrategy::constant(TimeDelta::seconds(-5)));

        assert_eq!(policy.retry_at(now, 1), now);
    }
}
