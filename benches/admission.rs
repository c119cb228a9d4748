//! Admission benchmarks: cost of the acquire/release hot path.
//!
//! Every dispatcher turn pays for one acquire and one release, so this is the
//! overhead the controller adds to each conversation turn.

use adaptive_admission::{AdmissionConfig, ConcurrencyController, Priority, SystemSample};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn controller() -> ConcurrencyController {
    ConcurrencyController::new(AdmissionConfig::default()).expect("controller")
}

// ---------------------------------------------------------------------------
// Bench: acquire + release of one stream on a free gate
// ---------------------------------------------------------------------------

fn bench_acquire_release(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let gate = controller();

    c.bench_function("acquire_release_regular", |b| {
        b.to_async(&rt).iter(|| async {
            let ok = gate.acquire(black_box("bench-stream"), Priority::Normal, false).await;
            gate.release("bench-stream").await;
            black_box(ok)
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: rejection when the gate is saturated
// ---------------------------------------------------------------------------

fn bench_reject_saturated(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let gate = controller();
    rt.block_on(async {
        for i in 0..AdmissionConfig::default().base_concurrent_limit {
            gate.acquire(&format!("holder-{i}"), Priority::Normal, false).await;
        }
    });

    c.bench_function("acquire_rejected", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(gate.acquire(black_box("late"), Priority::Low, false).await)
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: burst of distinct streams, then drain
// ---------------------------------------------------------------------------

fn bench_burst(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let ids: Vec<String> = (0..200).map(|i| format!("burst-{i}")).collect();

    let mut group = c.benchmark_group("acquire_burst");
    group.sample_size(20);

    for count in [10usize, 50, 200] {
        group.bench_with_input(BenchmarkId::new("streams", count), &count, |b, &count| {
            let gate = controller();
            b.to_async(&rt).iter(|| {
                let gate = gate.clone();
                let ids = &ids;
                async move {
                    for id in &ids[..count] {
                        black_box(gate.acquire(id, Priority::Normal, true).await);
                    }
                    for id in &ids[..count] {
                        gate.release(id).await;
                    }
                }
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: one adjustment cycle over a full window
// ---------------------------------------------------------------------------

fn bench_adjust_once(c: &mut Criterion) {
    let gate = controller();
    for _ in 0..12 {
        gate.collector()
            .record(SystemSample::new(0.5, 0.5, 10, Duration::ZERO));
    }

    c.bench_function("adjust_once", |b| {
        b.iter(|| black_box(gate.adjuster().adjust_once()))
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_reject_saturated,
    bench_burst,
    bench_adjust_once
);
criterion_main!(benches);
