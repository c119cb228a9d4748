//! # adaptive-admission
//!
//! Load-aware admission control for long-lived, Tokio-hosted chat services.
//!
//! ## Architecture
//!
//! A dispatcher asks the [`ConcurrencyController`] whether a conversation
//! stream may start work. The answer is immediate: admit from the priority
//! pool, the regular pool, a bounded forced override, or reject. Two
//! background loops keep the regular pool's ceiling in step with host load:
//! ```text
//! SysinfoProbe ─5s─► MetricsCollector ─window─► LimitAdjuster ─30s─► regular pool
//! ```

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod admission;
pub mod config;
pub mod load;
pub mod metrics;

// Re-exports for convenience
pub use admission::{
    AdjustmentOutcome, AdmissionDecision, AdmissionState, AdmissionStats, ConcurrencyController,
    LimitAdjuster, PermitSource, PoolCapacity, Priority, StreamRecord, StreamUpdate,
};
pub use config::{AdmissionConfig, ConfigError};
pub use load::{MetricsCollector, SysinfoProbe, SystemProbe, SystemSample};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for production log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=adaptive_admission=debug`).
///
/// # Errors
///
/// Returns [`AdmissionError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), AdmissionError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| AdmissionError::Other(format!("tracing init failed: {e}")))
}

/// Top-level admission controller errors.
///
/// None of these are fatal to the host process. A rejected admission is
/// not an error; it is `acquire` returning `false`.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The supplied configuration failed parsing or validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// An adjustment cycle could not compute a new ceiling.
    #[error("limit adjustment failed: {0}")]
    Adjustment(String),

    /// A lifecycle operation needs a Tokio runtime and none was found.
    #[error("tokio runtime unavailable: {0}")]
    Runtime(String),

    /// Prometheus metric construction or registration failed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Ask `controller` to admit a stream, accepting unconditionally when no
/// controller has been set up.
///
/// Dispatchers that construct the controller lazily call this so that an
/// uninitialised gate never blocks traffic.
///
/// # Example
///
/// ```rust
/// use adaptive_admission::{admit_or_accept, Priority};
/// # #[tokio::main]
/// # async fn main() {
/// assert!(admit_or_accept(None, "stream-1", Priority::Low, false).await);
/// # }
/// ```
pub async fn admit_or_accept(
    controller: Option<&ConcurrencyController>,
    stream_id: &str,
    priority: Priority,
    force: bool,
) -> bool {
    match controller {
        Some(c) => c.acquire(stream_id, priority, force).await,
        None => true,
    }
}
