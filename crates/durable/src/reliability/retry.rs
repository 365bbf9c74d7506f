//! Retry budgets for checkpointed steps
//!
//! A policy is a plain value handed to the executor per call. Attempt numbers
//! are 1-based and counted within one execution; the cumulative counter kept
//! in the step record is not consulted here.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::step::StepFailure;

/// How the wait between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `initial_interval` before every retry
    Fixed,

    /// `initial_interval * backoff_coefficient^(retry - 1)`, capped at `max_interval`
    #[default]
    Exponential,
}

/// Attempt budget and backoff for one kind of step
///
/// # Example
///
/// ```
/// use agentrun_durable::RetryPolicy;
/// use std::time::Duration;
///
/// // LLM calls: three tries, 1s then 2s apart
/// let llm = RetryPolicy::exponential().with_max_attempts(3);
/// assert_eq!(llm.delay_for_attempt(3), Duration::from_secs(2));
///
/// // Tool calls: two tries, 500ms apart
/// let tool = RetryPolicy::fixed(Duration::from_millis(500), 2);
/// assert_eq!(tool.delay_for_attempt(2), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per execution, the first one included
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Wait before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single wait
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor for exponential backoff
    pub backoff_coefficient: f64,

    /// Relative randomness applied to each wait (0.1 = +/-10%)
    pub jitter: f64,

    /// `StepFailure::error_type` values that exhaust the step immediately
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    fn with_backoff(
        backoff: BackoffKind,
        max_attempts: u32,
        initial: Duration,
        max: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            initial_interval: initial,
            max_interval: max,
            backoff_coefficient: match backoff {
                BackoffKind::Fixed => 1.0,
                BackoffKind::Exponential => 2.0,
            },
            jitter: 0.0,
            non_retryable_errors: Vec::new(),
        }
    }

    /// Three attempts, doubling from one second up to thirty
    pub fn exponential() -> Self {
        Self::with_backoff(
            BackoffKind::Exponential,
            3,
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
    }

    /// A single attempt
    pub fn no_retry() -> Self {
        Self::with_backoff(BackoffKind::Fixed, 1, Duration::ZERO, Duration::ZERO)
    }

    /// `max_attempts` tries, `interval` apart
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::with_backoff(BackoffKind::Fixed, max_attempts, interval, interval)
    }

    /// Clamped to at least one attempt
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Clamped to `0.0..=1.0`; non-finite values disable jitter
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Never retry failures carrying this error type (e.g. `HTTP_401`)
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Wait before `attempt`; the first attempt never waits
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let retry = match attempt.checked_sub(1) {
            Some(retry) if retry > 0 => retry,
            _ => return Duration::ZERO,
        };

        let delay = match self.backoff {
            BackoffKind::Fixed => self.initial_interval,
            BackoffKind::Exponential => {
                let factor = self.backoff_coefficient.powi(retry as i32 - 1);
                Duration::try_from_secs_f64(self.initial_interval.as_secs_f64() * factor)
                    .unwrap_or(self.max_interval)
            }
        };

        self.jittered(delay.min(self.max_interval))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        // NaN fails every comparison
        if !(self.jitter > 0.0 && self.jitter.is_finite()) || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Whether another attempt may follow `failure`
    pub fn allows_retry(&self, failure: &StepFailure) -> bool {
        if !failure.retryable {
            return false;
        }
        match failure.error_type.as_deref() {
            Some(error_type) => !self.non_retryable_errors.iter().any(|e| e == error_type),
            None => true,
        }
    }
}

/// Durations are stored as whole milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_style_policy_doubles() {
        let policy = RetryPolicy::exponential().with_max_attempts(5);

        let delays: Vec<_> = (1..=5).map(|a| policy.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn test_tool_style_policy_is_flat() {
        let policy =
            RetryPolicy::fixed(Duration::from_millis(500), 2).with_backoff_coefficient(3.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::exponential().with_max_interval(Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));

        // Overflowing growth still lands on the cap
        let policy = RetryPolicy::exponential().with_backoff_coefficient(1e300);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10), 3).with_jitter(0.1);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_secs(9) && delay <= Duration::from_secs(11));
        }
        assert_eq!(
            RetryPolicy::no_retry().with_jitter(0.5).delay_for_attempt(2),
            Duration::ZERO
        );
    }

    #[test]
    fn test_non_finite_jitter_is_ignored() {
        let interval = Duration::from_secs(2);

        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let policy = RetryPolicy::fixed(interval, 3).with_jitter(jitter);
            assert_eq!(policy.jitter, 0.0);
            assert_eq!(policy.delay_for_attempt(2), interval);
        }

        let mut policy = RetryPolicy::fixed(interval, 3);
        policy.jitter = f64::NAN;
        assert_eq!(policy.delay_for_attempt(2), interval);
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::fixed(Duration::ZERO, 0).max_attempts, 1);
        assert_eq!(RetryPolicy::exponential().with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_allows_retry() {
        let policy = RetryPolicy::exponential().with_non_retryable_error("HTTP_401");

        assert!(policy.allows_retry(&StepFailure::retryable("timeout")));
        assert!(policy.allows_retry(&StepFailure::retryable("busy").with_type("HTTP_503")));
        assert!(!policy.allows_retry(&StepFailure::retryable("denied").with_type("HTTP_401")));
        assert!(!policy.allows_retry(&StepFailure::non_retryable("bad request")));
    }

    #[test]
    fn test_stored_as_millis() {
        let policy =
            RetryPolicy::fixed(Duration::from_millis(250), 2).with_non_retryable_error("HTTP_400");

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["backoff"], "fixed");
        assert_eq!(json["initial_interval"], 250);
        assert_eq!(json["max_interval"], 250);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, policy);
    }
}
