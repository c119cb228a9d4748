//! Load-driven recomputation of the regular-pool ceiling.
//!
//! Each cycle averages the newest samples and multiplies the current
//! ceiling by a factor built from independent threshold rules:
//!
//! | Condition                          | Factor |
//! |------------------------------------|--------|
//! | avg cpu > `cpu_high_threshold`     | × 0.8  |
//! | avg cpu < `cpu_low_threshold`      | × 1.2  |
//! | avg memory > `memory_high_threshold` | × 0.7 |
//! | avg tasks > `in_flight_task_threshold` | × 0.9 |
//!
//! Rules compound; the result is rounded and clamped to
//! `[min_concurrent_limit, max_concurrent_limit]`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::gate::AdmissionGate;
use super::registry::StreamRegistry;
use super::stats::StatsReporter;
use crate::config::AdmissionConfig;
use crate::load::{MetricsCollector, SampleAverages};
use crate::{metrics, AdmissionError};

const CPU_HIGH_FACTOR: f64 = 0.8;
const CPU_LOW_FACTOR: f64 = 1.2;
const MEMORY_HIGH_FACTOR: f64 = 0.7;
const TASKS_HIGH_FACTOR: f64 = 0.9;

/// Result of one adjustment cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdjustmentOutcome {
    /// The window held no samples; nothing was done.
    NoSamples,
    /// The computed ceiling equalled the current one.
    Unchanged {
        /// The ceiling in force.
        ceiling: usize,
        /// Multiplier that was computed.
        factor: f64,
    },
    /// The ceiling moved.
    Resized {
        /// Ceiling before the cycle.
        old: usize,
        /// Ceiling after the cycle.
        new: usize,
        /// Multiplier that was computed.
        factor: f64,
    },
}

/// Combined multiplier for `avg` under the thresholds in `config`.
///
/// ```rust
/// use adaptive_admission::admission::adjuster::compute_factor;
/// use adaptive_admission::load::SampleAverages;
/// use adaptive_admission::AdmissionConfig;
///
/// let avg = SampleAverages {
///     cpu: 0.9,
///     memory: 0.9,
///     in_flight_tasks: 0.0,
///     scheduler_lag_seconds: 0.0,
///     count: 1,
/// };
/// let factor = compute_factor(&avg, &AdmissionConfig::default());
/// assert!((factor - 0.8 * 0.7).abs() < 1e-9);
/// ```
pub fn compute_factor(avg: &SampleAverages, config: &AdmissionConfig) -> f64 {
    let mut factor = 1.0;
    if avg.cpu > config.cpu_high_threshold {
        factor *= CPU_HIGH_FACTOR;
    } else if avg.cpu < config.cpu_low_threshold {
        factor *= CPU_LOW_FACTOR;
    }
    if avg.memory > config.memory_high_threshold {
        factor *= MEMORY_HIGH_FACTOR;
    }
    if avg.in_flight_tasks > config.in_flight_task_threshold as f64 {
        factor *= TASKS_HIGH_FACTOR;
    }
    factor
}

/// `round(current × factor)` clamped into `[min, max]`.
///
/// Halves round to even.
pub fn next_ceiling(current: usize, factor: f64, min: usize, max: usize) -> usize {
    let scaled = (current as f64 * factor).round_ties_even();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled as usize
    } else {
        0
    };
    scaled.clamp(min, max)
}

/// Periodically resizes the regular pool from sampled load.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug)]
pub struct LimitAdjuster {
    config: AdmissionConfig,
    collector: Arc<MetricsCollector>,
    gate: Arc<AdmissionGate>,
    registry: Arc<StreamRegistry>,
    stats: Arc<StatsReporter>,
}

impl LimitAdjuster {
    pub(crate) fn new(
        config: AdmissionConfig,
        collector: Arc<MetricsCollector>,
        gate: Arc<AdmissionGate>,
        registry: Arc<StreamRegistry>,
        stats: Arc<StatsReporter>,
    ) -> Self {
        Self {
            config,
            collector,
            gate,
            registry,
            stats,
        }
    }

    /// Run one adjustment cycle immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Adjustment`] if the sampled averages are not
    /// finite; the ceiling is left untouched.
    pub fn adjust_once(&self) -> Result<AdjustmentOutcome, AdmissionError> {
        let recent = self.collector.recent(self.config.adjustment_sample_count);
        let Some(avg) = SampleAverages::from_samples(&recent) else {
            debug!("no load samples yet, skipping adjustment");
            return Ok(AdjustmentOutcome::NoSamples);
        };
        if !avg.is_finite() {
            return Err(AdmissionError::Adjustment(format!(
                "non-finite load averages: {avg:?}"
            )));
        }

        let factor = compute_factor(&avg, &self.config);
        let (min, max) = (
            self.config.min_concurrent_limit,
            self.config.max_concurrent_limit,
        );

        match self
            .gate
            .resize_with(|current| next_ceiling(current, factor, min, max))
        {
            Ok((old, new)) => {
                self.stats.record_adjustment();
                metrics::set_current_limit(new);
                metrics::inc_limit_adjustment(if new > old { "grow" } else { "shrink" });
                info!(
                    old,
                    new,
                    factor,
                    avg_cpu = avg.cpu,
                    avg_memory = avg.memory,
                    avg_tasks = avg.in_flight_tasks,
                    samples = avg.count,
                    "concurrency limit adjusted"
                );
                Ok(AdjustmentOutcome::Resized { old, new, factor })
            }
            Err(current) => {
                debug!(ceiling = current, factor, "concurrency limit unchanged");
                Ok(AdjustmentOutcome::Unchanged {
                    ceiling: current,
                    factor,
                })
            }
        }
    }

    /// One loop iteration: adjust, then evict idle streams if configured.
    /// Failures are logged and the cycle skipped.
    fn run_cycle(&self) {
        if let Err(e) = self.adjust_once() {
            warn!(error = %e, "limit adjustment failed, skipping cycle");
        }
        if let Some(ttl) = self.config.stream_idle_ttl() {
            self.registry.evict_idle(ttl);
        }
    }

    /// Spawn the adjustment loop. The first cycle runs one `interval` after
    /// spawning.
    pub(crate) fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let now = tokio::time::Instant::now();
            let start = now.checked_add(interval).unwrap_or_else(|| {
                warn!(
                    interval_s = interval.as_secs(),
                    "adjustment interval out of range, first cycle runs now"
                );
                now
            });
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_s = interval.as_secs(), "limit adjuster started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_cycle(),
                    _ = shutdown.changed() => {
                        info!("limit adjuster shutdown signal received");
                        break;
                    }
                }
            }
        })
    }
}
