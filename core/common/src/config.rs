//! Runtime configuration for the offline layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the executor, queue, sync engine and batcher.
///
/// All durations are expressed in milliseconds so the struct can be
/// deserialized from an environment/config object as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Maximum automatic retries per work item or request.
    pub max_retries: u32,
    /// Initial backoff delay between retries.
    pub base_backoff_ms: u64,
    /// Cap for exponential backoff growth.
    pub max_backoff_ms: u64,
    /// Per-attempt request deadline.
    pub request_timeout_ms: u64,
    /// Event count that triggers a telemetry flush.
    pub batch_size: usize,
    /// Interval between periodic telemetry flushes.
    pub flush_interval_ms: u64,
    /// Cap on the persisted offline event list; oldest entries are
    /// dropped once exceeded.
    pub max_offline_events: usize,
    /// Interval for the coarse periodic queue drain, a fallback for
    /// platforms without push-based connectivity events.
    pub sync_poll_interval_ms: u64,
    /// Connectivity cache window; the reachability probe runs at most
    /// once per window.
    pub connectivity_poll_ms: u64,
    /// Whether backoff delays carry random jitter.
    pub jitter: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 8000,
            request_timeout_ms: 15000,
            batch_size: 20,
            flush_interval_ms: 30000,
            max_offline_events: 1000,
            sync_poll_interval_ms: 300_000,
            connectivity_poll_ms: 5000,
            jitter: true,
        }
    }
}

impl OfflineConfig {
    /// Set maximum retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial backoff delay.
    pub fn with_base_backoff_ms(mut self, ms: u64) -> Self {
        self.base_backoff_ms = ms;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Set the flush-triggering batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the periodic flush interval.
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    /// Set the offline event cap.
    pub fn with_max_offline_events(mut self, cap: usize) -> Self {
        self.max_offline_events = cap;
        self
    }

    /// Set the periodic drain interval.
    pub fn with_sync_poll_interval_ms(mut self, ms: u64) -> Self {
        self.sync_poll_interval_ms = ms;
        self
    }

    /// Set the connectivity cache window.
    pub fn with_connectivity_poll_ms(mut self, ms: u64) -> Self {
        self.connectivity_poll_ms = ms;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Per-attempt deadline as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Periodic flush interval as a Duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Periodic drain interval as a Duration.
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }

    /// Connectivity cache window as a Duration.
    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_millis(self.connectivity_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_backoff_ms, 1000);
        assert_eq!(config.max_backoff_ms, 8000);
        assert_eq!(config.request_timeout_ms, 15000);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_offline_events, 1000);
    }

    #[test]
    fn test_builder_setters() {
        let config = OfflineConfig::default()
            .with_max_retries(5)
            .with_base_backoff_ms(10)
            .with_jitter(false);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_backoff_ms, 10);
        assert!(!config.jitter);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = OfflineConfig::default().with_batch_size(50);
        let json = serde_json::to_string(&config).unwrap();
        let restored: OfflineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.batch_size, 50);
        assert_eq!(restored.sync_poll_interval_ms, 300_000);
    }
}
