//! Admission counters and derived rates.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::gate::AdmissionDecision;
use super::PermitSource;

/// Weight kept from the previous concurrency average on each update.
const CONCURRENCY_SMOOTHING: f64 = 0.9;

#[derive(Debug, Default)]
struct Concurrency {
    average: f64,
    peak: usize,
}

/// Monotonic admission counters plus smoothed concurrency.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Default)]
pub struct StatsReporter {
    total: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    priority_accepted: AtomicU64,
    forced: AtomicU64,
    limit_adjustments: AtomicU64,
    concurrency: Mutex<Concurrency>,
}

/// Point-in-time copy of the counters held by [`StatsReporter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsCounters {
    /// Every admission attempt.
    pub total_requests: u64,
    /// Attempts that returned `true`, including idempotent re-entries.
    pub accepted: u64,
    /// Attempts that returned `false`.
    pub rejected: u64,
    /// Admissions drawn from the priority pool.
    pub priority_accepted: u64,
    /// Admissions granted above the regular ceiling.
    pub forced: u64,
    /// Ceiling changes applied by the adjuster.
    pub limit_adjustments: u64,
    /// Exponentially smoothed active-stream count.
    pub avg_concurrency: f64,
    /// Highest active-stream count observed.
    pub peak_concurrency: usize,
}

impl StatsCounters {
    /// `accepted / total_requests`, or `0.0` before any attempt.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.total_requests as f64
    }
}

impl StatsReporter {
    /// Create a zeroed reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one admission decision.
    pub fn record_decision(&self, decision: AdmissionDecision) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match decision {
            AdmissionDecision::Rejected => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            AdmissionDecision::AlreadyActive => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            AdmissionDecision::Admitted(source) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                match source {
                    PermitSource::Priority => {
                        self.priority_accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    PermitSource::Forced => {
                        self.forced.fetch_add(1, Ordering::Relaxed);
                    }
                    PermitSource::Regular => {}
                }
            }
        }
    }

    /// Fold the current active-stream count into the smoothed average and peak.
    pub fn record_concurrency(&self, active: usize) {
        let mut c = self.concurrency.lock();
        c.average = CONCURRENCY_SMOOTHING * c.average + (1.0 - CONCURRENCY_SMOOTHING) * active as f64;
        c.peak = c.peak.max(active);
    }

    /// Count one applied ceiling change.
    pub fn record_adjustment(&self) {
        self.limit_adjustments.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter.
    pub fn counters(&self) -> StatsCounters {
        let (avg_concurrency, peak_concurrency) = {
            let c = self.concurrency.lock();
            (c.average, c.peak)
        };
        StatsCounters {
            total_requests: self.total.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            priority_accepted: self.priority_accepted.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            limit_adjustments: self.limit_adjustments.load(Ordering::Relaxed),
            avg_concurrency,
            peak_concurrency,
        }
    }
}

/// Snapshot returned by [`ConcurrencyController::get_stats`](crate::ConcurrencyController::get_stats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Current regular-pool ceiling.
    pub current_limit: usize,
    /// Streams currently admitted.
    pub active_streams: usize,
    /// Every admission attempt.
    pub total_requests: u64,
    /// Attempts that returned `true`.
    pub accepted: u64,
    /// Attempts that returned `false`.
    pub rejected: u64,
    /// Admissions drawn from the priority pool.
    pub priority_accepted: u64,
    /// Admissions granted above the regular ceiling.
    pub forced: u64,
    /// `accepted / total_requests`.
    pub acceptance_rate: f64,
    /// Exponentially smoothed active-stream count.
    pub avg_concurrency: f64,
    /// Highest active-stream count observed.
    pub peak_concurrency: usize,
    /// Ceiling changes applied so far.
    pub limit_adjustments: u64,
    /// Newest sampled CPU fraction, `0.0` before the first sample.
    pub system_cpu: f64,
    /// Newest sampled memory fraction, `0.0` before the first sample.
    pub system_memory: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let s = StatsReporter::new();
        let c = s.counters();
        assert_eq!(c, StatsCounters::default());
        assert_eq!(c.acceptance_rate(), 0.0);
    }

    #[test]
    fn test_decisions_counted_by_kind() {
        let s = StatsReporter::new();
        s.record_decision(AdmissionDecision::Admitted(PermitSource::Regular));
        s.record_decision(AdmissionDecision::Admitted(PermitSource::Priority));
        s.record_decision(AdmissionDecision::Admitted(PermitSource::Forced));
        s.record_decision(AdmissionDecision::AlreadyActive);
        s.record_decision(AdmissionDecision::Rejected);
        let c = s.counters();
        assert_eq!(c.total_requests, 5);
        assert_eq!(c.accepted, 4);
        assert_eq!(c.rejected, 1);
        assert_eq!(c.priority_accepted, 1);
        assert_eq!(c.forced, 1);
        assert!((c.acceptance_rate() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_concurrency_smoothing_and_peak() {
        let s = StatsReporter::new();
        s.record_concurrency(10);
        let c = s.counters();
        assert!((c.avg_concurrency - 1.0).abs() < 1e-9);
        s.record_concurrency(0);
        let c = s.counters();
        assert!((c.avg_concurrency - 0.9).abs() < 1e-9);
        assert_eq!(c.peak_concurrency, 10);
    }

    #[test]
    fn test_adjustments_counted() {
        let s = StatsReporter::new();
        s.record_adjustment();
        s.record_adjustment();
        assert_eq!(s.counters().limit_adjustments, 2);
    }
}
