//! Retry policies with configurable backoff.
//!
//! Delays grow by `backoff_coefficient` per failed attempt, capped by
//! `maximum_interval_ms`. A coefficient of 1.0 gives constant-interval retry,
//! which is how the completion poll is governed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a stage invocation.
///
/// Missing fields take their values from [`RetryPolicy::default`]; an explicit
/// `null` clears the interval cap or the attempt cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry in milliseconds.
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_coefficient: f64,
    /// Maximum delay cap in milliseconds.
    pub maximum_interval_ms: Option<u64>,
    /// Maximum attempts including the first; `None` retries until the time budget runs out.
    pub maximum_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: Some(100_000),
            maximum_attempts: Some(3),
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constant-interval policy with no attempt cap.
    #[must_use]
    pub fn constant(interval_ms: u64) -> Self {
        Self {
            initial_interval_ms: interval_ms,
            backoff_coefficient: 1.0,
            maximum_interval_ms: None,
            maximum_attempts: None,
        }
    }

    /// Sets the initial interval.
    #[must_use]
    pub fn with_initial_interval_ms(mut self, interval_ms: u64) -> Self {
        self.initial_interval_ms = interval_ms;
        self
    }

    /// Sets the backoff coefficient.
    #[must_use]
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Sets the maximum interval.
    #[must_use]
    pub fn with_maximum_interval_ms(mut self, interval_ms: u64) -> Self {
        self.maximum_interval_ms = Some(interval_ms);
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = Some(attempts);
        self
    }

    /// Removes the attempt cap.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.maximum_attempts = None;
        self
    }

    /// Calculates the delay after the given number of failed attempts (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let mut millis = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exponent);
        if let Some(cap) = self.maximum_interval_ms {
            millis = millis.min(cap as f64);
        }
        Duration::from_millis(millis.round() as u64)
    }
}

/// Counts failed attempts of one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Failed attempts so far.
    pub failures: u32,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of the attempt about to run, starting at 1.
    #[must_use]
    pub const fn next_attempt(&self) -> u32 {
        self.failures + 1
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
}

/// Records a failed attempt and decides whether to try again.
///
/// `elapsed` is the time spent since the first attempt started; when a
/// `budget` is given, a retry whose delay would reach past it is refused.
#[must_use]
pub fn should_retry(
    state: &mut RetryState,
    policy: &RetryPolicy,
    elapsed: Duration,
    budget: Option<Duration>,
) -> RetryDecision {
    state.failures += 1;

    if let Some(max) = policy.maximum_attempts {
        if state.failures >= max {
            return RetryDecision::GiveUp;
        }
    }

    let delay = policy.delay_for_attempt(state.failures - 1);
    if let Some(budget) = budget {
        if elapsed + delay >= budget {
            return RetryDecision::GiveUp;
        }
    }

    RetryDecision::Retry(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_interval_ms, 1000);
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.maximum_attempts, Some(3));
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new()
            .with_initial_interval_ms(500)
            .with_backoff_coefficient(3.0)
            .with_maximum_interval_ms(10_000)
            .with_maximum_attempts(5);

        assert_eq!(policy.initial_interval_ms, 500);
        assert_eq!(policy.maximum_interval_ms, Some(10_000));
        assert_eq!(policy.maximum_attempts, Some(5));
        assert_eq!(policy.clone().unlimited().maximum_attempts, None);
    }

    #[test]
    fn test_constant_delay_never_grows() {
        let policy = RetryPolicy::constant(2000);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy::new()
            .with_initial_interval_ms(100)
            .with_maximum_interval_ms(500);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry_respects_attempt_cap() {
        let policy = RetryPolicy::new().with_maximum_attempts(3);
        let mut state = RetryState::new();

        assert!(matches!(
            should_retry(&mut state, &policy, Duration::ZERO, None),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            should_retry(&mut state, &policy, Duration::ZERO, None),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            should_retry(&mut state, &policy, Duration::ZERO, None),
            RetryDecision::GiveUp
        );
        assert_eq!(state.failures, 3);
    }

    #[test]
    fn test_should_retry_respects_time_budget() {
        let policy = RetryPolicy::constant(2000);
        let mut state = RetryState::new();
        let budget = Some(Duration::from_secs(3000));

        assert_eq!(
            should_retry(&mut state, &policy, Duration::from_secs(100), budget),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            should_retry(&mut state, &policy, Duration::from_secs(2999), budget),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_unlimited_policy_keeps_retrying() {
        let policy = RetryPolicy::constant(2000);
        let mut state = RetryState::new();

        for _ in 0..1000 {
            assert_eq!(
                should_retry(&mut state, &policy, Duration::ZERO, None),
                RetryDecision::Retry(Duration::from_secs(2))
            );
        }
        assert_eq!(state.next_attempt(), 1001);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"backoff_coefficient": 1.0}"#).unwrap();
        assert_eq!(policy.initial_interval_ms, 1000);
        assert_eq!(policy.maximum_attempts, Some(3));

        let unlimited: RetryPolicy =
            serde_json::from_str(r#"{"maximum_attempts": null}"#).unwrap();
        assert_eq!(unlimited.maximum_attempts, None);
    }
}
