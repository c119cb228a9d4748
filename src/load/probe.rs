//! Host resource probes.
//!
//! [`SystemProbe`] is the seam between the collector and the operating
//! system. Production code uses [`SysinfoProbe`]; tests inject scripted
//! probes.

use sysinfo::{CpuExt, System, SystemExt};
use thiserror::Error;

/// Failure reading a single host metric.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The platform did not report the metric.
    #[error("{metric} unavailable: {reason}")]
    Unavailable {
        /// Metric name (`"cpu"`, `"memory"`, `"in_flight_tasks"`).
        metric: &'static str,
        /// Why it could not be read.
        reason: String,
    },
}

/// Source of instantaneous host utilisation readings.
///
/// Implementations are polled from the collector loop, one call per metric
/// per tick.
pub trait SystemProbe: Send + 'static {
    /// Current CPU utilisation in `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the reading is unavailable.
    fn cpu_fraction(&mut self) -> Result<f64, ProbeError>;

    /// Current memory utilisation in `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the reading is unavailable.
    fn memory_fraction(&mut self) -> Result<f64, ProbeError>;
}

/// [`SystemProbe`] backed by the `sysinfo` crate.
///
/// CPU usage is computed from the delta between two refreshes, so the very
/// first reading after construction may be `0.0`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    /// Create a probe and prime its CPU and memory counters.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe")
            .field("cpus", &self.system.cpus().len())
            .finish()
    }
}

impl SystemProbe for SysinfoProbe {
    fn cpu_fraction(&mut self) -> Result<f64, ProbeError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(ProbeError::Unavailable {
                metric: "cpu",
                reason: "no cpus reported".into(),
            });
        }
        let percent = f64::from(self.system.global_cpu_info().cpu_usage());
        Ok((percent / 100.0).clamp(0.0, 1.0))
    }

    fn memory_fraction(&mut self) -> Result<f64, ProbeError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable {
                metric: "memory",
                reason: "total memory reported as zero".into(),
            });
        }
        Ok((self.system.used_memory() as f64 / total as f64).clamp(0.0, 1.0))
    }
}
