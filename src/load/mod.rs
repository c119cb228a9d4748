//! # Host load sampling
//!
//! ## Responsibility
//! Periodically sample CPU, memory, live task count and scheduler lag into a
//! bounded rolling window, and summarise the newest samples for the limit
//! adjuster.
//!
//! ## Guarantees
//! - Total: a sample is produced every tick, even when a probe fails
//!   (the failing field is logged and recorded as `0`)
//! - Bounded: samples older than the configured window are evicted
//! - Isolated: readers only ever receive copies of the window
//!
//! ## NOT Responsible For
//! - Deciding the new ceiling (that belongs to `admission::adjuster`)

pub mod collector;
pub mod probe;

use std::time::{Duration, Instant};

pub use collector::MetricsCollector;
pub use probe::{ProbeError, SysinfoProbe, SystemProbe};

/// One immutable observation of host load.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSample {
    /// Host CPU utilisation in `[0.0, 1.0]`.
    pub cpu_fraction: f64,
    /// Host memory utilisation in `[0.0, 1.0]`.
    pub memory_fraction: f64,
    /// Tasks alive on the runtime when the sample was taken.
    pub in_flight_tasks: usize,
    /// Time a zero-delay yield took to be rescheduled.
    pub scheduler_lag: Duration,
    /// When the sample was taken.
    pub sampled_at: Instant,
}

impl SystemSample {
    /// Build a sample stamped with the current instant.
    ///
    /// Fractions are clamped into `[0.0, 1.0]`; non-finite values are kept
    /// as-is so the adjuster can reject them.
    pub fn new(
        cpu_fraction: f64,
        memory_fraction: f64,
        in_flight_tasks: usize,
        scheduler_lag: Duration,
    ) -> Self {
        Self {
            cpu_fraction: cpu_fraction.clamp(0.0, 1.0),
            memory_fraction: memory_fraction.clamp(0.0, 1.0),
            in_flight_tasks,
            scheduler_lag,
            sampled_at: Instant::now(),
        }
    }
}

/// Arithmetic means over a slice of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleAverages {
    /// Mean CPU fraction.
    pub cpu: f64,
    /// Mean memory fraction.
    pub memory: f64,
    /// Mean in-flight task count.
    pub in_flight_tasks: f64,
    /// Mean scheduler lag in seconds.
    pub scheduler_lag_seconds: f64,
    /// Number of samples averaged.
    pub count: usize,
}

impl SampleAverages {
    /// Average `samples`, or `None` when the slice is empty.
    pub fn from_samples(samples: &[SystemSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let (cpu, memory, tasks, lag) = samples.iter().fold(
            (0.0, 0.0, 0.0, 0.0),
            |(c, m, t, l), s| {
                (
                    c + s.cpu_fraction,
                    m + s.memory_fraction,
                    t + s.in_flight_tasks as f64,
                    l + s.scheduler_lag.as_secs_f64(),
                )
            },
        );
        Some(Self {
            cpu: cpu / n,
            memory: memory / n,
            in_flight_tasks: tasks / n,
            scheduler_lag_seconds: lag / n,
            count: samples.len(),
        })
    }

    /// `true` when every mean is a finite number.
    pub fn is_finite(&self) -> bool {
        self.cpu.is_finite()
            && self.memory.is_finite()
            && self.in_flight_tasks.is_finite()
            && self.scheduler_lag_seconds.is_finite()
    }
}
