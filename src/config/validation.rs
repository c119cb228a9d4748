//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on an [`AdmissionConfig`] that the type
//! system cannot express (range checks, cross-field ordering of limits and
//! thresholds).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field name and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use tokio::sync::Semaphore;

use super::AdmissionConfig;

/// Longest accepted interval, window or timeout: 30 days.
pub const MAX_DURATION_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Field name (e.g., "min_concurrent_limit").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn is_fraction(v: f64) -> bool {
    v.is_finite() && v > 0.0 && v <= 1.0
}

/// Validate all semantic constraints on an [`AdmissionConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &AdmissionConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Limits ───────────────────────────────────────────────────────
    if config.min_concurrent_limit == 0 {
        errors.push(invalid("min_concurrent_limit", 0, "must be at least 1"));
    }

    if config.min_concurrent_limit > config.max_concurrent_limit {
        errors.push(invalid(
            "min_concurrent_limit",
            config.min_concurrent_limit,
            "must be \u{2264} max_concurrent_limit",
        ));
    }

    if config.base_concurrent_limit < config.min_concurrent_limit
        || config.base_concurrent_limit > config.max_concurrent_limit
    {
        errors.push(invalid(
            "base_concurrent_limit",
            config.base_concurrent_limit,
            "must lie within [min_concurrent_limit, max_concurrent_limit]",
        ));
    }

    for (field, value) in [
        ("max_concurrent_limit", config.max_concurrent_limit),
        ("priority_pool_size", config.priority_pool_size),
    ] {
        if value > Semaphore::MAX_PERMITS {
            errors.push(invalid(
                field,
                value,
                "exceeds the largest permit count a pool can hold",
            ));
        }
    }

    // ── Thresholds ───────────────────────────────────────────────────
    for (field, value) in [
        ("cpu_high_threshold", config.cpu_high_threshold),
        ("cpu_low_threshold", config.cpu_low_threshold),
        ("memory_high_threshold", config.memory_high_threshold),
    ] {
        if !is_fraction(value) {
            errors.push(invalid(field, value, "must be in (0.0, 1.0]"));
        }
    }

    if config.cpu_low_threshold >= config.cpu_high_threshold {
        errors.push(invalid(
            "cpu_low_threshold",
            config.cpu_low_threshold,
            "must be < cpu_high_threshold",
        ));
    }

    if !config.force_response_time_seconds.is_finite() || config.force_response_time_seconds < 0.0
    {
        errors.push(invalid(
            "force_response_time_seconds",
            config.force_response_time_seconds,
            "must be a non-negative number of seconds",
        ));
    }

    // ── Cadence ──────────────────────────────────────────────────────
    for (field, value) in [
        ("metrics_interval_seconds", config.metrics_interval_seconds),
        ("metrics_window_seconds", config.metrics_window_seconds),
        ("adjustment_interval_seconds", config.adjustment_interval_seconds),
    ] {
        if value == 0 {
            errors.push(invalid(field, 0, "must be at least 1 second"));
        }
    }

    for (field, value) in [
        ("metrics_interval_seconds", config.metrics_interval_seconds),
        ("metrics_window_seconds", config.metrics_window_seconds),
        ("adjustment_interval_seconds", config.adjustment_interval_seconds),
        ("force_activity_window_seconds", config.force_activity_window_seconds),
        ("shutdown_timeout_seconds", config.shutdown_timeout_seconds),
        ("stream_idle_ttl_seconds", config.stream_idle_ttl_seconds),
    ] {
        if value > MAX_DURATION_SECONDS {
            errors.push(invalid(field, value, "must be at most 30 days"));
        }
    }

    if config.adjustment_sample_count == 0 {
        errors.push(invalid("adjustment_sample_count", 0, "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
