//! Integration tests for the admission controller.
//!
//! These tests drive the public surface end to end:
//! - Capacity scenarios (regular pool, forced override, hard cap)
//! - Priority precedence and the backlog force-dispatch heuristic
//! - Idempotent re-entry and release of unknown streams
//! - Load-driven ceiling adjustment and its clamp
//! - The hard cap under concurrent operation
//! - The background adjustment loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adaptive_admission::load::ProbeError;
use adaptive_admission::{
    admit_or_accept, AdjustmentOutcome, AdmissionConfig, AdmissionDecision, AdmissionError,
    ConcurrencyController, PermitSource, PoolCapacity, Priority, StreamUpdate, SystemProbe,
    SystemSample,
};

// ── Helper functions ──────────────────────────────────────────────

struct FixedProbe;

impl SystemProbe for FixedProbe {
    fn cpu_fraction(&mut self) -> Result<f64, ProbeError> {
        Ok(0.5)
    }
    fn memory_fraction(&mut self) -> Result<f64, ProbeError> {
        Ok(0.5)
    }
}

/// Reports a saturated CPU on every reading.
struct HotHost;

impl SystemProbe for HotHost {
    fn cpu_fraction(&mut self) -> Result<f64, ProbeError> {
        Ok(0.95)
    }
    fn memory_fraction(&mut self) -> Result<f64, ProbeError> {
        Ok(0.5)
    }
}

fn limits(base: usize, max: usize, priority_pool: usize) -> AdmissionConfig {
    AdmissionConfig {
        base_concurrent_limit: base,
        max_concurrent_limit: max,
        min_concurrent_limit: 1,
        priority_pool_size: priority_pool,
        ..AdmissionConfig::default()
    }
}

fn controller(config: AdmissionConfig) -> ConcurrencyController {
    ConcurrencyController::with_probe(config, Box::new(FixedProbe)).expect("test: valid config")
}

fn load(cpu: f64, memory: f64, tasks: usize) -> SystemSample {
    SystemSample::new(cpu, memory, tasks, Duration::ZERO)
}

// ── Capacity scenarios ────────────────────────────────────────────

#[tokio::test]
async fn test_forced_admission_stops_at_hard_cap() {
    let c = controller(limits(2, 4, 5));

    assert!(c.acquire("a", Priority::Normal, false).await);
    assert!(c.acquire("b", Priority::Normal, false).await);
    assert!(!c.acquire("c", Priority::Normal, false).await);

    assert!(c.acquire("c", Priority::Normal, true).await);
    assert_eq!(c.get_stats().active_streams, 3);
    assert!(c.acquire("d", Priority::Normal, true).await);
    assert_eq!(c.get_stats().active_streams, 4);
    assert!(!c.acquire("e", Priority::Normal, true).await);
    assert_eq!(c.get_stats().active_streams, 4);

    let stats = c.get_stats();
    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.forced, 2);
    assert_eq!(stats.peak_concurrency, 4);
}

#[tokio::test]
async fn test_critical_admit_and_release_counts() {
    let c = controller(AdmissionConfig::default());
    assert!(c.acquire("x", Priority::Critical, false).await);
    c.release("x").await;

    let stats = c.get_stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.priority_accepted, 1);
    assert_eq!(stats.active_streams, 0);
    assert_eq!(stats.acceptance_rate, 1.0);
}

#[tokio::test]
async fn test_release_unknown_stream_is_harmless() {
    let c = controller(limits(2, 4, 1));
    c.release("never-admitted").await;
    c.release("never-admitted").await;

    let stats = c.get_stats();
    assert_eq!(stats.active_streams, 0);
    assert_eq!(stats.total_requests, 0);
    assert_eq!(
        c.available_permits(),
        PoolCapacity {
            regular: 2,
            priority: 1
        }
    );
}

#[tokio::test]
async fn test_reacquire_consumes_no_permit() {
    let c = controller(limits(3, 6, 2));
    assert!(c.acquire("s", Priority::High, false).await);
    let before = c.available_permits();

    assert!(c.acquire("s", Priority::High, false).await);
    assert!(c.acquire("s", Priority::Normal, true).await);
    assert_eq!(c.available_permits(), before);
    assert_eq!(c.get_stats().active_streams, 1);
    assert_eq!(
        c.admit("s", Priority::High, false).await,
        AdmissionDecision::AlreadyActive
    );
}

#[tokio::test]
async fn test_release_returns_permit_to_its_pool() {
    let c = controller(limits(1, 4, 1));
    assert_eq!(
        c.admit("p", Priority::High, false).await,
        AdmissionDecision::Admitted(PermitSource::Priority)
    );
    assert_eq!(
        c.admit("r", Priority::Normal, false).await,
        AdmissionDecision::Admitted(PermitSource::Regular)
    );
    assert_eq!(
        c.available_permits(),
        PoolCapacity {
            regular: 0,
            priority: 0
        }
    );

    c.release("p").await;
    assert_eq!(c.available_permits().priority, 1);
    assert_eq!(c.available_permits().regular, 0);

    c.release("r").await;
    assert_eq!(c.available_permits().regular, 1);
}

// ── Priority and force dispatch ───────────────────────────────────

#[tokio::test]
async fn test_high_priority_wins_when_regular_pool_saturated() {
    let c = controller(limits(1, 10, 1));
    assert!(c.acquire("filler", Priority::Normal, false).await);

    assert!(!c.acquire("normal", Priority::Normal, false).await);
    assert_eq!(
        c.admit("high", Priority::High, false).await,
        AdmissionDecision::Admitted(PermitSource::Priority)
    );
}

#[tokio::test]
async fn test_force_valve_bounded_by_max() {
    let c = controller(limits(1, 3, 1));
    assert!(c.acquire("r", Priority::Normal, false).await);
    assert!(c.acquire("p", Priority::High, false).await);

    assert_eq!(
        c.admit("f1", Priority::Low, true).await,
        AdmissionDecision::Admitted(PermitSource::Forced)
    );
    assert!(!c.acquire("f2", Priority::Low, true).await);
    assert!(!c.acquire("f3", Priority::Critical, false).await);
    assert!(!c.acquire("f4", Priority::High, false).await);

    // Releasing a forced admission frees a slot under the hard cap only.
    c.release("f1").await;
    assert_eq!(c.available_permits().regular, 0);
    assert!(c.acquire("f2", Priority::Low, true).await);
}

#[tokio::test]
async fn test_slow_recent_stream_is_force_dispatched() {
    let c = controller(limits(1, 5, 0));
    assert!(c.acquire("filler", Priority::Normal, false).await);

    assert!(!c.acquire("slow", Priority::Normal, false).await);
    c.update_stream_metrics(
        "slow",
        StreamUpdate::new().response_time(Duration::from_secs(6)),
    )
    .await;
    assert_eq!(
        c.admit("slow", Priority::Normal, false).await,
        AdmissionDecision::Admitted(PermitSource::Forced)
    );
}

#[tokio::test]
async fn test_slow_but_stale_stream_is_not_forced() {
    let Some(stale) = Instant::now().checked_sub(Duration::from_secs(3)) else {
        return;
    };
    let c = controller(AdmissionConfig {
        force_activity_window_seconds: 1,
        ..limits(1, 5, 0)
    });
    assert!(c.acquire("filler", Priority::Normal, false).await);

    assert!(!c.acquire("old", Priority::Normal, false).await);
    c.update_stream_metrics(
        "old",
        StreamUpdate::new()
            .response_time(Duration::from_secs(30))
            .last_activity(stale),
    )
    .await;
    assert!(!c.acquire("old", Priority::Normal, false).await);
}

#[tokio::test]
async fn test_records_track_activity() {
    let c = controller(limits(2, 4, 1));
    c.acquire("s", Priority::Low, false).await;
    c.acquire("s", Priority::Low, false).await;

    let record = c.stream("s").expect("test: record exists");
    assert!(record.active);
    assert_eq!(record.total_requests, 2);
    assert_eq!(record.priority, Priority::Low);

    c.release("s").await;
    let record = c.stream("s").expect("test: record kept after release");
    assert!(!record.active);
    assert_eq!(c.streams().len(), 1);
}

// ── Limit adjustment ──────────────────────────────────────────────

#[tokio::test]
async fn test_high_cpu_shrinks_ceiling_by_a_fifth() {
    let c = controller(AdmissionConfig::default());
    for _ in 0..3 {
        c.collector().record(load(0.9, 0.5, 0));
    }

    let outcome = c.adjuster().adjust_once().expect("test: adjust");
    assert_eq!(
        outcome,
        AdjustmentOutcome::Resized {
            old: 50,
            new: 40,
            factor: 0.8
        }
    );
    assert_eq!(c.current_limit(), 40);
}

#[tokio::test]
async fn test_adjust_without_samples_is_noop() {
    let c = controller(AdmissionConfig::default());
    assert_eq!(
        c.adjuster().adjust_once().expect("test: adjust"),
        AdjustmentOutcome::NoSamples
    );
    assert_eq!(c.current_limit(), 50);
    assert_eq!(c.get_stats().limit_adjustments, 0);
}

#[tokio::test]
async fn test_non_finite_load_skips_cycle() {
    let c = controller(AdmissionConfig::default());
    c.collector().record(load(f64::NAN, 0.5, 0));

    let err = c.adjuster().adjust_once().unwrap_err();
    assert!(matches!(err, AdmissionError::Adjustment(_)));
    assert_eq!(c.current_limit(), 50);
}

#[tokio::test]
async fn test_sustained_idle_grows_to_max_and_pressure_to_min() {
    let config = AdmissionConfig {
        base_concurrent_limit: 20,
        min_concurrent_limit: 5,
        max_concurrent_limit: 60,
        ..AdmissionConfig::default()
    };
    let c = controller(config);

    for _ in 0..20 {
        c.collector().record(load(0.1, 0.2, 0));
        c.adjuster().adjust_once().expect("test: adjust");
    }
    assert_eq!(c.current_limit(), 60);
    assert_eq!(c.available_permits().regular, 60);

    for _ in 0..20 {
        c.collector().record(load(0.95, 0.95, 5_000));
        c.adjuster().adjust_once().expect("test: adjust");
    }
    assert_eq!(c.current_limit(), 5);
    assert_eq!(c.available_permits().regular, 5);
}

#[tokio::test]
async fn test_shrink_below_active_does_not_evict() {
    let c = controller(AdmissionConfig {
        base_concurrent_limit: 10,
        min_concurrent_limit: 2,
        max_concurrent_limit: 20,
        ..AdmissionConfig::default()
    });
    for i in 0..10 {
        assert!(c.acquire(&format!("s{i}"), Priority::Normal, false).await);
    }

    for _ in 0..10 {
        c.collector().record(load(0.9, 0.9, 0));
    }
    c.adjuster().adjust_once().expect("test: adjust");
    assert_eq!(c.current_limit(), 6);
    assert_eq!(c.get_stats().active_streams, 10);

    // Newcomers are refused until the active count drops below the ceiling.
    assert!(!c.acquire("late", Priority::Normal, false).await);
    for i in 0..5 {
        c.release(&format!("s{i}")).await;
    }
    assert!(c.acquire("late", Priority::Normal, false).await);
    assert_eq!(c.available_permits().regular, 0);
}

// ── Invariants under arbitrary operation ──────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hard_cap_holds_across_threads() {
    const MAX: usize = 8;
    let c = controller(limits(4, MAX, 2));
    let admitted = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..64 {
        let c = c.clone();
        let admitted = Arc::clone(&admitted);
        handles.push(tokio::spawn(async move {
            let priority = if i % 4 == 0 {
                Priority::High
            } else {
                Priority::Normal
            };
            if c.acquire(&format!("t{i}"), priority, true).await {
                admitted.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for h in handles {
        h.await.expect("test: task panicked");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), MAX);
    let stats = c.get_stats();
    assert_eq!(stats.active_streams, MAX);
    assert_eq!(stats.accepted, MAX as u64);
    assert_eq!(stats.rejected, 64 - MAX as u64);
}

// ── Lifecycle and fallback ────────────────────────────────────────

#[tokio::test]
async fn test_started_adjuster_shrinks_ceiling_under_load() {
    let config = AdmissionConfig {
        metrics_interval_seconds: 1,
        adjustment_interval_seconds: 1,
        ..AdmissionConfig::default()
    };
    let c = ConcurrencyController::with_probe(config, Box::new(HotHost))
        .expect("test: valid config");
    c.start().expect("test: start");

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert!(c.current_limit() < 50, "limit still {}", c.current_limit());
    assert!(c.get_stats().limit_adjustments >= 1);
    assert!(c.admission_state().last_adjustment_at.is_some());
    c.stop().await;
    assert!(!c.is_running());
}

#[tokio::test]
async fn test_uninitialised_gate_accepts_everything() {
    for i in 0..500 {
        assert!(admit_or_accept(None, &format!("s{i}"), Priority::Low, false).await);
    }
}

#[tokio::test]
async fn test_start_samples_then_stop_with_zero_timeout() {
    let c = controller(limits(2, 4, 1));
    c.start().expect("test: start");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!c.collector().is_empty());

    c.stop_with_timeout(Duration::ZERO).await;
    assert!(!c.is_running());

    // Admission keeps working after the loops are gone.
    assert!(c.acquire("a", Priority::Normal, false).await);
}

#[tokio::test]
async fn test_stats_serialise_to_json() {
    let c = controller(limits(2, 4, 1));
    c.acquire("a", Priority::Normal, false).await;

    let json = serde_json::to_value(c.get_stats()).expect("test: serialise");
    assert_eq!(json["current_limit"], 2);
    assert_eq!(json["active_streams"], 1);
    assert_eq!(json["accepted"], 1);
    assert!(json.get("system_cpu").is_some());
}
