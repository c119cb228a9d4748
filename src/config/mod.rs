//! # Admission controller configuration
//!
//! ## Responsibility
//! Define every tunable of the admission controller: pool sizes, sampling
//! and adjustment cadence, load thresholds, force-dispatch heuristics and
//! shutdown bounds.
//!
//! ## Guarantees
//! - Defaulted: every field has a documented default, so a partial TOML
//!   table (or none at all) yields a usable config
//! - Validated: [`AdmissionConfig::validate`] reports *all* violations at once
//! - Serializable: round-trips through serde (TOML ↔ Rust)
//!
//! ## NOT Responsible For
//! - Reading files from disk (that belongs to `loader`)
//! - Applying limits at runtime (that belongs to `admission`)

pub mod loader;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use validation::ConfigError;

// ── Default value functions ──────────────────────────────────────────────

/// Default starting ceiling of the regular pool: 50.
fn default_base_concurrent_limit() -> usize {
    50
}

/// Default hard cap on concurrently active streams: 200.
fn default_max_concurrent_limit() -> usize {
    200
}

/// Default floor of the regular pool: 10.
fn default_min_concurrent_limit() -> usize {
    10
}

/// Default capacity of the dedicated High/Critical pool: 5.
fn default_priority_pool_size() -> usize {
    5
}

/// Default host sampling cadence: 5 seconds.
fn default_metrics_interval_seconds() -> u64 {
    5
}

/// Default retention of the rolling sample window: 60 seconds.
fn default_metrics_window_seconds() -> u64 {
    60
}

/// Default ceiling recomputation cadence: 30 seconds.
fn default_adjustment_interval_seconds() -> u64 {
    30
}

/// Default number of most-recent samples averaged per adjustment: 10.
fn default_adjustment_sample_count() -> usize {
    10
}

/// Default CPU fraction above which the ceiling shrinks: 0.8.
fn default_cpu_high_threshold() -> f64 {
    0.8
}

/// Default CPU fraction below which the ceiling grows: 0.3.
fn default_cpu_low_threshold() -> f64 {
    0.3
}

/// Default memory fraction above which the ceiling shrinks: 0.85.
fn default_memory_high_threshold() -> f64 {
    0.85
}

/// Default in-flight task count above which the ceiling shrinks: 1000.
fn default_in_flight_task_threshold() -> usize {
    1000
}

/// Default recency window for the backlog force-dispatch signal: 300 seconds.
fn default_force_activity_window_seconds() -> u64 {
    300
}

/// Default response time above which a recent stream counts as backlogged: 5s.
fn default_force_response_time_seconds() -> f64 {
    5.0
}

/// Default bound on how long `stop` waits for background loops: 10 seconds.
fn default_shutdown_timeout_seconds() -> u64 {
    10
}

/// Default idle TTL for stream records: 0 (eviction disabled).
fn default_stream_idle_ttl_seconds() -> u64 {
    0
}

// ── Config ───────────────────────────────────────────────────────────────

/// Configuration for a [`ConcurrencyController`](crate::ConcurrencyController).
///
/// # Example
///
/// ```toml
/// base_concurrent_limit = 50
/// max_concurrent_limit = 200
/// min_concurrent_limit = 10
/// cpu_high_threshold = 0.8
/// ```
///
/// ```rust
/// use adaptive_admission::AdmissionConfig;
/// let config = AdmissionConfig::default();
/// assert_eq!(config.base_concurrent_limit, 50);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Initial ceiling of the regular pool.
    #[serde(default = "default_base_concurrent_limit")]
    pub base_concurrent_limit: usize,

    /// Upper bound of the ceiling and hard cap on active streams.
    #[serde(default = "default_max_concurrent_limit")]
    pub max_concurrent_limit: usize,

    /// Lower bound of the ceiling.
    #[serde(default = "default_min_concurrent_limit")]
    pub min_concurrent_limit: usize,

    /// Capacity of the pool reserved for High and Critical streams.
    #[serde(default = "default_priority_pool_size")]
    pub priority_pool_size: usize,

    /// Seconds between host load samples.
    #[serde(default = "default_metrics_interval_seconds")]
    pub metrics_interval_seconds: u64,

    /// Samples older than this many seconds are evicted from the window.
    #[serde(default = "default_metrics_window_seconds")]
    pub metrics_window_seconds: u64,

    /// Seconds between ceiling adjustments.
    #[serde(default = "default_adjustment_interval_seconds")]
    pub adjustment_interval_seconds: u64,

    /// How many of the newest samples each adjustment averages.
    #[serde(default = "default_adjustment_sample_count")]
    pub adjustment_sample_count: usize,

    /// Average CPU fraction above which the ceiling is multiplied by 0.8.
    #[serde(default = "default_cpu_high_threshold")]
    pub cpu_high_threshold: f64,

    /// Average CPU fraction below which the ceiling is multiplied by 1.2.
    #[serde(default = "default_cpu_low_threshold")]
    pub cpu_low_threshold: f64,

    /// Average memory fraction above which the ceiling is multiplied by 0.7.
    #[serde(default = "default_memory_high_threshold")]
    pub memory_high_threshold: f64,

    /// Average in-flight task count above which the ceiling is multiplied by 0.9.
    #[serde(default = "default_in_flight_task_threshold")]
    pub in_flight_task_threshold: usize,

    /// A stream active within this many seconds may be force-dispatched
    /// when its response time indicates a backlog.
    #[serde(default = "default_force_activity_window_seconds")]
    pub force_activity_window_seconds: u64,

    /// Average response time (seconds) above which a recent stream is
    /// considered backlogged.
    #[serde(default = "default_force_response_time_seconds")]
    pub force_response_time_seconds: f64,

    /// Upper bound on how long `stop` waits for the background loops.
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Inactive stream records untouched for this many seconds are evicted
    /// on each adjustment cycle. `0` disables eviction.
    #[serde(default = "default_stream_idle_ttl_seconds")]
    pub stream_idle_ttl_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            base_concurrent_limit: default_base_concurrent_limit(),
            max_concurrent_limit: default_max_concurrent_limit(),
            min_concurrent_limit: default_min_concurrent_limit(),
            priority_pool_size: default_priority_pool_size(),
            metrics_interval_seconds: default_metrics_interval_seconds(),
            metrics_window_seconds: default_metrics_window_seconds(),
            adjustment_interval_seconds: default_adjustment_interval_seconds(),
            adjustment_sample_count: default_adjustment_sample_count(),
            cpu_high_threshold: default_cpu_high_threshold(),
            cpu_low_threshold: default_cpu_low_threshold(),
            memory_high_threshold: default_memory_high_threshold(),
            in_flight_task_threshold: default_in_flight_task_threshold(),
            force_activity_window_seconds: default_force_activity_window_seconds(),
            force_response_time_seconds: default_force_response_time_seconds(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            stream_idle_ttl_seconds: default_stream_idle_ttl_seconds(),
        }
    }
}

impl AdmissionConfig {
    /// Validate the configuration, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] with all messages joined by `; `.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self).map_err(|errors| {
            ConfigError::Validation(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }

    /// Sampling cadence as a [`Duration`].
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    /// Rolling window retention as a [`Duration`].
    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_seconds)
    }

    /// Adjustment cadence as a [`Duration`].
    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_seconds)
    }

    /// Recency window of the backlog signal as a [`Duration`].
    pub fn force_activity_window(&self) -> Duration {
        Duration::from_secs(self.force_activity_window_seconds)
    }

    /// Backlog response-time threshold as a [`Duration`].
    ///
    /// Negative or non-finite values collapse to zero.
    pub fn force_response_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.force_response_time_seconds).unwrap_or_default()
    }

    /// Shutdown bound as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Idle TTL for stream records, or `None` when eviction is disabled.
    pub fn stream_idle_ttl(&self) -> Option<Duration> {
        match self.stream_idle_ttl_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = AdmissionConfig::default();
        assert_eq!(config.base_concurrent_limit, 50);
        assert_eq!(config.max_concurrent_limit, 200);
        assert_eq!(config.min_concurrent_limit, 10);
        assert_eq!(config.priority_pool_size, 5);
    }

    #[test]
    fn test_default_thresholds() {
        let config = AdmissionConfig::default();
        assert_eq!(config.cpu_high_threshold, 0.8);
        assert_eq!(config.cpu_low_threshold, 0.3);
        assert_eq!(config.memory_high_threshold, 0.85);
        assert_eq!(config.in_flight_task_threshold, 1000);
    }

    #[test]
    fn test_default_intervals() {
        let config = AdmissionConfig::default();
        assert_eq!(config.metrics_interval(), Duration::from_secs(5));
        assert_eq!(config.metrics_window(), Duration::from_secs(60));
        assert_eq!(config.adjustment_interval(), Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AdmissionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_idle_ttl_zero_disables_eviction() {
        let config = AdmissionConfig::default();
        assert!(config.stream_idle_ttl().is_none());

        let config = AdmissionConfig {
            stream_idle_ttl_seconds: 600,
            ..AdmissionConfig::default()
        };
        assert_eq!(config.stream_idle_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_force_response_time_negative_is_zero() {
        let config = AdmissionConfig {
            force_response_time_seconds: -1.0,
            ..AdmissionConfig::default()
        };
        assert_eq!(config.force_response_time(), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AdmissionConfig =
            toml::from_str("base_concurrent_limit = 20").expect("test: parse");
        assert_eq!(config.base_concurrent_limit, 20);
        assert_eq!(config.max_concurrent_limit, 200);
    }

    #[test]
    fn test_toml_roundtrip_preserves_fields() {
        let config = AdmissionConfig {
            base_concurrent_limit: 33,
            stream_idle_ttl_seconds: 120,
            ..AdmissionConfig::default()
        };
        let text = toml::to_string(&config).expect("test: serialize");
        let back: AdmissionConfig = toml::from_str(&text).expect("test: parse");
        assert_eq!(back, config);
    }
}
