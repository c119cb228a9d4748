//! Prometheus metrics for the admission controller.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_decision`, `set_current_limit`, …) are no-ops if `init_metrics`
//! was never called.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `admission_decisions_total` | Counter | `outcome` |
//! | `admission_limit_adjustments_total` | Counter | `direction` |
//! | `admission_current_limit` | Gauge | |
//! | `admission_active_streams` | Gauge | |
//! | `admission_system_cpu_ratio` | Gauge | |
//! | `admission_system_memory_ratio` | Gauge | |
//! | `admission_scheduler_lag_seconds` | Gauge | |

use crate::admission::{AdmissionDecision, PermitSource};
use crate::load::SystemSample;
use crate::AdmissionError;
use prometheus::{CounterVec, Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the controller, bundled together so they can
/// be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Admission decisions by outcome.
    pub decisions_total: CounterVec,
    /// Ceiling changes by direction.
    pub limit_adjustments: CounterVec,
    /// Current regular-pool ceiling.
    pub current_limit: IntGauge,
    /// Currently admitted streams.
    pub active_streams: IntGauge,
    /// Newest sampled CPU fraction.
    pub system_cpu: Gauge,
    /// Newest sampled memory fraction.
    pub system_memory: Gauge,
    /// Newest sampled scheduler lag.
    pub scheduler_lag: Gauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> AdmissionError {
    AdmissionError::Metrics(format!("metrics init failed: {e}"))
}

fn register<C: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    collector: &C,
) -> Result<(), AdmissionError> {
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| AdmissionError::Metrics(format!("metrics registration failed: {e}")))
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Build a metrics bundle backed by a fresh private registry.
fn build() -> Result<Metrics, AdmissionError> {
    let registry = Registry::new();

    let decisions_total = CounterVec::new(
        Opts::new("admission_decisions_total", "Admission decisions by outcome"),
        &["outcome"],
    )
    .map_err(init_err)?;
    register(&registry, &decisions_total)?;

    let limit_adjustments = CounterVec::new(
        Opts::new(
            "admission_limit_adjustments_total",
            "Regular-pool ceiling changes by direction",
        ),
        &["direction"],
    )
    .map_err(init_err)?;
    register(&registry, &limit_adjustments)?;

    let current_limit =
        IntGauge::new("admission_current_limit", "Current regular-pool ceiling").map_err(init_err)?;
    register(&registry, &current_limit)?;

    let active_streams =
        IntGauge::new("admission_active_streams", "Currently admitted streams").map_err(init_err)?;
    register(&registry, &active_streams)?;

    let system_cpu =
        Gauge::new("admission_system_cpu_ratio", "Newest sampled CPU fraction").map_err(init_err)?;
    register(&registry, &system_cpu)?;

    let system_memory = Gauge::new(
        "admission_system_memory_ratio",
        "Newest sampled memory fraction",
    )
    .map_err(init_err)?;
    register(&registry, &system_memory)?;

    let scheduler_lag = Gauge::new(
        "admission_scheduler_lag_seconds",
        "Newest sampled scheduler lag",
    )
    .map_err(init_err)?;
    register(&registry, &scheduler_lag)?;

    Ok(Metrics {
        registry,
        decisions_total,
        limit_adjustments,
        current_limit,
        active_streams,
        system_cpu,
        system_memory,
        scheduler_lag,
    })
}

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`AdmissionError::Metrics`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), AdmissionError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = build()?;
    // If another thread raced us, the first one wins; both bundles are identical.
    let _ = METRICS.set(bundle);
    Ok(())
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Label used for a decision in `admission_decisions_total`.
pub fn decision_label(decision: AdmissionDecision) -> &'static str {
    match decision {
        AdmissionDecision::Admitted(PermitSource::Regular) => "accepted",
        AdmissionDecision::Admitted(PermitSource::Priority) => "priority_accepted",
        AdmissionDecision::Admitted(PermitSource::Forced) => "forced",
        AdmissionDecision::AlreadyActive => "already_active",
        AdmissionDecision::Rejected => "rejected",
    }
}

/// Count one admission decision.
///
/// No-op if metrics have not been initialised.
pub fn inc_decision(decision: AdmissionDecision) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .decisions_total
            .get_metric_with_label_values(&[decision_label(decision)])
        {
            c.inc();
        }
    }
}

/// Count one ceiling change in `direction` (`"grow"` or `"shrink"`).
///
/// No-op if metrics have not been initialised.
pub fn inc_limit_adjustment(direction: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.limit_adjustments.get_metric_with_label_values(&[direction]) {
            c.inc();
        }
    }
}

/// Set the current-limit gauge.
///
/// The gauge is process-wide: with more than one running controller it holds
/// the value written last.
///
/// No-op if metrics have not been initialised.
pub fn set_current_limit(limit: usize) {
    if let Some(m) = metrics() {
        m.current_limit.set(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}

/// Set the active-streams gauge.
///
/// No-op if metrics have not been initialised.
pub fn set_active_streams(active: usize) {
    if let Some(m) = metrics() {
        m.active_streams.set(i64::try_from(active).unwrap_or(i64::MAX));
    }
}

/// Publish the host readings of one load sample.
///
/// No-op if metrics have not been initialised.
pub fn observe_sample(sample: &SystemSample) {
    if let Some(m) = metrics() {
        m.system_cpu.set(sample.cpu_fraction);
        m.system_memory.set(sample.memory_fraction);
        m.scheduler_lag.set(sample.scheduler_lag.as_secs_f64());
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    encode(&m.registry)
}

fn encode(registry: &Registry) -> String {
    let families = registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
