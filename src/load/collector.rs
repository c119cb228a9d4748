//! Rolling-window host load collector.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::probe::{ProbeError, SystemProbe};
use super::SystemSample;
use crate::config::AdmissionConfig;
use crate::metrics;

/// Upper bound on samples held, whatever the window and interval.
pub const MAX_WINDOW_SAMPLES: usize = 4_096;

/// Samples host load on a fixed cadence into a bounded window.
///
/// The window is owned here; every accessor returns a copy.
///
/// # Panics
///
/// No methods on this type panic.
pub struct MetricsCollector {
    probe: Mutex<Box<dyn SystemProbe>>,
    samples: Mutex<VecDeque<SystemSample>>,
    window: Duration,
    capacity: usize,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("window", &self.window)
            .field("capacity", &self.capacity)
            .field("len", &self.samples.lock().len())
            .finish()
    }
}

impl MetricsCollector {
    /// Create a collector whose window matches `config`.
    ///
    /// The window holds at most one sample per interval that fits inside
    /// `metrics_window_seconds`, plus one, capped at [`MAX_WINDOW_SAMPLES`].
    pub fn new(config: &AdmissionConfig, probe: Box<dyn SystemProbe>) -> Self {
        let per_window = config.metrics_window_seconds / config.metrics_interval_seconds.max(1);
        let capacity = usize::try_from(per_window)
            .unwrap_or(usize::MAX)
            .max(1)
            .saturating_add(1)
            .min(MAX_WINDOW_SAMPLES);
        Self {
            probe: Mutex::new(probe),
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            window: config.metrics_window(),
            capacity,
        }
    }

    /// Take one sample immediately and append it to the window.
    ///
    /// Probe failures are logged and the affected field recorded as zero.
    pub async fn sample_now(&self) -> SystemSample {
        let (cpu, memory) = {
            let mut probe = self.probe.lock();
            (
                or_zero("cpu", probe.cpu_fraction()),
                or_zero("memory", probe.memory_fraction()),
            )
        };
        let in_flight_tasks = or_zero("in_flight_tasks", alive_tasks());
        let scheduler_lag = measure_scheduler_lag().await;

        let sample = SystemSample::new(cpu, memory, in_flight_tasks, scheduler_lag);
        self.record(sample);
        metrics::observe_sample(&sample);
        debug!(
            cpu = sample.cpu_fraction,
            memory = sample.memory_fraction,
            in_flight_tasks,
            lag_us = scheduler_lag.as_micros() as u64,
            "load sample"
        );
        sample
    }

    /// Append an externally produced sample, evicting expired entries.
    pub fn record(&self, sample: SystemSample) {
        let mut samples = self.samples.lock();
        while samples
            .front()
            .map(|s| sample.sampled_at.saturating_duration_since(s.sampled_at) > self.window)
            .unwrap_or(false)
        {
            samples.pop_front();
        }
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Copy of the whole window, oldest first.
    pub fn snapshot(&self) -> Vec<SystemSample> {
        self.samples.lock().iter().copied().collect()
    }

    /// Copy of the newest `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<SystemSample> {
        let samples = self.samples.lock();
        let skip = samples.len().saturating_sub(n);
        samples.iter().skip(skip).copied().collect()
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<SystemSample> {
        self.samples.lock().back().copied()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// `true` if no sample has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Spawn the sampling loop. It samples once immediately, then every
    /// `interval`, until `shutdown` flips or its sender is dropped.
    pub(crate) fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_s = interval.as_secs(), "metrics collector started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sample_now().await;
                    }
                    _ = shutdown.changed() => {
                        info!("metrics collector shutdown signal received");
                        break;
                    }
                }
            }
        })
    }
}

fn or_zero<T: Default>(metric: &'static str, reading: Result<T, ProbeError>) -> T {
    reading.unwrap_or_else(|e| {
        warn!(metric, error = %e, "load probe failed, recording zero");
        T::default()
    })
}

fn alive_tasks() -> Result<usize, ProbeError> {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks())
        .map_err(|e| ProbeError::Unavailable {
            metric: "in_flight_tasks",
            reason: e.to_string(),
        })
}

/// Time between yielding to the scheduler and being polled again.
async fn measure_scheduler_lag() -> Duration {
    let start = Instant::now();
    tokio::task::yield_now().await;
    start.elapsed()
}
