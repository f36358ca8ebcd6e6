use std::time::Duration;

use tracing::warn;

use crate::policy::{RetryPolicy, StepRetryPolicy, TimeoutBehavior};
use crate::transport::sse::MAX_LINE_BYTES;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api/v1";

const API_BASE_ENV: &str = "RAG_API_BASE";
const TIMEOUT_ENV: &str = "RAG_STREAM_TIMEOUT_MS";
const MAX_RETRIES_ENV: &str = "RAG_MAX_RETRIES";
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for a [`StreamingQueryClient`](crate::StreamingQueryClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the query API, e.g. `https://rag.example.com/api/v1`.
    pub api_base: String,
    /// Limit on time-to-first-byte. Reading the body afterwards is not limited.
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub step_retry: StepRetryPolicy,
    pub timeout_behavior: TimeoutBehavior,
    /// Longest body line accepted before the attempt fails.
    pub max_line_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            step_retry: StepRetryPolicy::default(),
            timeout_behavior: TimeoutBehavior::default(),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self::default().api_base(api_base)
    }

    /// Builds a config from `RAG_API_BASE`, `RAG_STREAM_TIMEOUT_MS` and
    /// `RAG_MAX_RETRIES`; unset, blank or unparsable values keep their
    /// defaults, and so does a zero timeout.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(base) = lookup(API_BASE_ENV)
            && !base.trim().is_empty()
        {
            config.api_base = base.trim().to_string();
        }
        match parse_var::<u64>(&lookup, TIMEOUT_ENV) {
            Some(0) => warn!(
                event = "config.invalid",
                key = TIMEOUT_ENV,
                reason = "zero timeout"
            ),
            Some(ms) => config.timeout = Duration::from_millis(ms),
            None => {}
        }
        if let Some(retries) = parse_var::<u32>(&lookup, MAX_RETRIES_ENV) {
            config.retry_policy = config.retry_policy.with_max_retries(retries);
        }
        config
    }

    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Sets the first-byte limit; clamped to at least one millisecond.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(MIN_TIMEOUT);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy = self.retry_policy.with_max_retries(max_retries);
        self
    }

    pub fn step_retry(mut self, policy: StepRetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    pub fn timeout_behavior(mut self, behavior: TimeoutBehavior) -> Self {
        self.timeout_behavior = behavior;
        self
    }

    pub fn max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub(crate) fn stream_url(&self) -> String {
        format!("{}/query/stream", self.api_base.trim_end_matches('/'))
    }
}

fn parse_var<T: std::str::FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() && !raw.trim().is_empty() {
        warn!(event = "config.invalid", key = key, value = %raw);
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry_policy.max_retries, 3);
        assert_eq!(config.step_retry, StepRetryPolicy::Preserve);
        assert_eq!(config.timeout_behavior, TimeoutBehavior::Cancel);
        assert_eq!(config.max_line_bytes, 1 << 20);
    }

    #[test]
    fn stream_url_tolerates_trailing_slash() {
        let config = ClientConfig::new("https://rag.example.com/api/v1/");
        assert_eq!(
            config.stream_url(),
            "https://rag.example.com/api/v1/query/stream"
        );
    }

    fn vars(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let pairs = pairs.to_vec();
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn vars_override_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            (API_BASE_ENV, " https://rag.example.com/api/v1 "),
            (TIMEOUT_ENV, "2500"),
            (MAX_RETRIES_ENV, "5"),
        ]));
        assert_eq!(config.api_base, "https://rag.example.com/api/v1");
        assert_eq!(config.timeout, Duration::from_millis(2_500));
        assert_eq!(config.retry_policy.max_retries, 5);
    }

    #[test]
    fn blank_invalid_and_zero_vars_keep_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            (API_BASE_ENV, "   "),
            (TIMEOUT_ENV, "0"),
            (MAX_RETRIES_ENV, "lots"),
        ]));
        let defaults = ClientConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.timeout, defaults.timeout);
        assert_eq!(config.retry_policy, defaults.retry_policy);

        let config = ClientConfig::from_vars(vars(&[(TIMEOUT_ENV, "-5")]));
        assert_eq!(config.timeout, defaults.timeout);
    }

    #[test]
    fn zero_timeout_setter_is_clamped() {
        let config = ClientConfig::default().timeout(Duration::ZERO);
        assert_eq!(config.timeout, MIN_TIMEOUT);
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _lock = env_lock();
        unsafe {
            std::env::set_var(API_BASE_ENV, "http://10.0.0.5:9000/api/v1");
            std::env::set_var(TIMEOUT_ENV, "0");
            std::env::set_var(MAX_RETRIES_ENV, "1");
        }
        let config = ClientConfig::from_env();
        unsafe {
            std::env::remove_var(API_BASE_ENV);
            std::env::remove_var(TIMEOUT_ENV);
            std::env::remove_var(MAX_RETRIES_ENV);
        }
        assert_eq!(config.api_base, "http://10.0.0.5:9000/api/v1");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry_policy.max_retries, 1);

        let config = ClientConfig::from_env();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.retry_policy.max_retries, 3);
    }
}
