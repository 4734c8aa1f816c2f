//! Retry policy: error classification and exponential backoff.

use std::time::Duration;

use tether_common::{ApiError, OfflineConfig};

/// How an error should be handled by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network-unreachable or timeout; retry with backoff.
    RetryableNetwork,
    /// Server failure (5xx) or rate limit (429); retry with backoff.
    RetryableServer,
    /// Client-side failure; never retried.
    TerminalClient,
    /// Auth failure; terminal for this attempt, triggers one-shot
    /// session renewal.
    TerminalAuth,
}

/// Classify an error. Stateless and side-effect-free.
pub fn classify(error: &ApiError) -> ErrorClass {
    match error {
        ApiError::Offline | ApiError::Network(_) | ApiError::Timeout(_) => {
            ErrorClass::RetryableNetwork
        }
        ApiError::Server { .. } => ErrorClass::RetryableServer,
        ApiError::Auth(_) => ErrorClass::TerminalAuth,
        ApiError::Validation { .. }
        | ApiError::Cancelled
        | ApiError::Storage(_)
        | ApiError::Serialization(_)
        | ApiError::Unknown(_) => ErrorClass::TerminalClient,
    }
}

/// Per-attempt retry decision, derived from the error and attempt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub is_auth_error: bool,
}

/// Derive the decision for one attempt.
pub fn decide(
    error: &ApiError,
    attempt: u32,
    max_retries: u32,
    policy: &BackoffPolicy,
) -> RetryDecision {
    match classify(error) {
        ErrorClass::RetryableNetwork | ErrorClass::RetryableServer => RetryDecision {
            should_retry: attempt < max_retries,
            delay: policy.delay_for_attempt(attempt),
            is_auth_error: false,
        },
        ErrorClass::TerminalAuth => RetryDecision {
            should_retry: false,
            delay: Duration::ZERO,
            is_auth_error: true,
        },
        ErrorClass::TerminalClient => RetryDecision {
            should_retry: false,
            delay: Duration::ZERO,
            is_auth_error: false,
        },
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Initial delay between retries.
    pub base: Duration,
    /// Cap for exponential growth.
    pub max: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Build from the shared runtime configuration.
    pub fn from_config(config: &OfflineConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }

    /// Delay before the retry following attempt number `attempt`
    /// (zero-based): `base * 2^attempt`, capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base.as_millis() as f64 * 2f64.powi(attempt.min(31) as i32);
        let capped = base.min(self.max.as_millis() as f64);

        let final_delay = if self.jitter {
            // +/- 25% jitter
            let factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped * factor
        } else {
            capped
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&OfflineConfig::default())
    }
}
