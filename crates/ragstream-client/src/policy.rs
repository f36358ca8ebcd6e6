use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff for transient stream failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Automatic re-sends allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Multiplier applied per retry already made.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    /// Zero or non-positive inputs fall back to the defaults.
    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let defaults = Self::none();
        Self {
            max_retries,
            initial_backoff_ms: Some(initial_backoff_ms)
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.initial_backoff_ms),
            backoff_factor: Some(backoff_factor)
                .filter(|f| *f > 0.0)
                .unwrap_or(defaults.backoff_factor),
            max_backoff_ms: defaults.max_backoff_ms,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Delay before retry number `retries_done + 1`.
    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        let exp = self.backoff_factor.powi(retries_done.min(i32::MAX as u32) as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round();
        let cap = self.max_backoff_ms.max(1);
        let clamped = if base.is_finite() && base < cap as f64 {
            base as u64
        } else {
            cap
        };
        Duration::from_millis(clamped)
    }
}

/// What happens to the step tracker when a failed attempt is re-sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRetryPolicy {
    /// Stages completed by an earlier attempt stay completed.
    #[default]
    Preserve,
    /// Every retry starts from four pending stages.
    Reset,
}

/// How an expired first-byte timeout is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    /// Abort the exchange and resolve as cancelled, without an error.
    #[default]
    Cancel,
    /// Treat the timeout as a transient failure subject to the retry policy.
    Retry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_has_zero_retries() {
        let p = RetryPolicy::none();
        assert_eq!(p.max_retries, 0);
        assert!(!p.can_retry(0));
    }

    #[test]
    fn default_policy_doubles_from_one_second_up_to_ten() {
        let p = RetryPolicy::default();
        let delays: Vec<u128> = (0..6).map(|n| p.backoff_duration(n).as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert!(p.can_retry(2));
        assert!(!p.can_retry(3));
    }

    #[test]
    fn huge_retry_counts_stay_at_the_cap() {
        let p = RetryPolicy::exponential(3, 100, 2.0).with_max_backoff_ms(250);
        assert_eq!(p.backoff_duration(1).as_millis(), 200);
        assert_eq!(p.backoff_duration(2).as_millis(), 250);
        assert_eq!(p.backoff_duration(5_000).as_millis(), 250);
    }

    #[test]
    fn policy_fields_fall_back_to_defaults_when_missing() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_retries":1}"#).expect("parse");
        assert_eq!(p.max_retries, 1);
        assert_eq!(p.initial_backoff_ms, 1_000);
        assert_eq!(p.max_backoff_ms, 10_000);
    }
}
