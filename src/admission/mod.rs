//! # Admission: adaptive concurrency gate for conversation streams
//!
//! ## Responsibility
//! Decide, without waiting, whether a conversation stream may start work
//! now, and keep the regular-pool ceiling in step with host load.
//!
//! ## Architecture
//!
//! ```text
//!              acquire(id, priority, force)
//!                        │
//!                        ▼
//!   ┌──────────── AdmissionGate (one mutex) ─────────────┐
//!   │ active? ─► hard cap ─► priority pool ─► regular ─► │
//!   │                                  force-dispatch ─► │
//!   └────────────────────────────────────────────────────┘
//!           ▲ resize                       │ records
//!           │                              ▼
//!     LimitAdjuster ◄── MetricsCollector   StreamRegistry / StatsReporter
//!     (every 30s)       (every 5s)
//! ```
//!
//! ## Guarantees
//! - Non-blocking: `acquire` never queues; a saturated gate answers `false`
//! - Bounded: active streams never exceed `max_concurrent_limit`, forced
//!   admissions included
//! - Idempotent: re-acquiring an active stream consumes no permit
//! - Lazy shrink: lowering the ceiling never revokes permits already held
//!
//! ## NOT Responsible For
//! - The work performed once a stream is admitted
//! - Persisting limiter state across restarts
//!
//! ## Example
//!
//! ```rust,no_run
//! use adaptive_admission::{AdmissionConfig, ConcurrencyController, Priority};
//!
//! # async fn example() -> Result<(), adaptive_admission::AdmissionError> {
//! let controller = ConcurrencyController::new(AdmissionConfig::default())?;
//! controller.start()?;
//!
//! if controller.acquire("stream-42", Priority::Normal, false).await {
//!     // ... handle the conversation turn ...
//!     controller.release("stream-42").await;
//! }
//!
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod adjuster;
pub mod gate;
pub mod priority;
pub mod registry;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

pub use adjuster::{AdjustmentOutcome, LimitAdjuster};
pub use gate::{AdmissionDecision, AdmissionState, PermitSource, PoolCapacity};
pub use priority::Priority;
pub use registry::{StreamRecord, StreamRegistry, StreamUpdate};
pub use stats::{AdmissionStats, StatsCounters, StatsReporter};

use crate::config::AdmissionConfig;
use crate::load::{MetricsCollector, SysinfoProbe, SystemProbe};
use crate::{metrics, AdmissionError};
use gate::AdmissionGate;

struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    collector: JoinHandle<()>,
    adjuster: JoinHandle<()>,
}

struct ControllerInner {
    config: AdmissionConfig,
    gate: Arc<AdmissionGate>,
    registry: Arc<StreamRegistry>,
    stats: Arc<StatsReporter>,
    collector: Arc<MetricsCollector>,
    adjuster: Arc<LimitAdjuster>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

/// Adaptive admission controller for conversation streams.
///
/// Cheap to clone; clones share one gate, registry and set of background
/// loops. Construct one per process (or per test) and hand clones to the
/// dispatchers that need it.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Clone)]
pub struct ConcurrencyController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for ConcurrencyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyController")
            .field("current_limit", &self.inner.gate.current_ceiling())
            .field("active_streams", &self.inner.gate.active_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ConcurrencyController {
    /// Create a controller that samples the host through [`SysinfoProbe`].
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: AdmissionConfig) -> Result<Self, AdmissionError> {
        Self::with_probe(config, Box::new(SysinfoProbe::new()))
    }

    /// Create a controller that samples the host through `probe`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidConfig`] if `config` fails validation.
    pub fn with_probe(
        config: AdmissionConfig,
        probe: Box<dyn SystemProbe>,
    ) -> Result<Self, AdmissionError> {
        config.validate()?;

        let registry = Arc::new(StreamRegistry::new());
        let stats = Arc::new(StatsReporter::new());
        let gate = Arc::new(AdmissionGate::new(&config, Arc::clone(&registry)));
        let collector = Arc::new(MetricsCollector::new(&config, probe));
        let adjuster = Arc::new(LimitAdjuster::new(
            config.clone(),
            Arc::clone(&collector),
            Arc::clone(&gate),
            Arc::clone(&registry),
            Arc::clone(&stats),
        ));

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                gate,
                registry,
                stats,
                collector,
                adjuster,
                tasks: Mutex::new(None),
            }),
        })
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Start the sampling and adjustment loops. Calling it again while
    /// running is a no-op.
    ///
    /// Starting publishes this controller's ceiling to the process-wide
    /// `admission_current_limit` gauge; with several running controllers the
    /// gauge reflects whichever last started or adjusted.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Runtime`] when called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), AdmissionError> {
        let mut tasks = self.inner.tasks.lock();
        if tasks.is_some() {
            debug!("admission controller already running");
            return Ok(());
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| AdmissionError::Runtime(e.to_string()))?;

        metrics::set_current_limit(self.inner.gate.current_ceiling());
        let (shutdown, rx) = watch::channel(false);
        let collector =
            Arc::clone(&self.inner.collector).spawn(self.inner.config.metrics_interval(), rx.clone());
        let adjuster =
            Arc::clone(&self.inner.adjuster).spawn(self.inner.config.adjustment_interval(), rx);

        *tasks = Some(BackgroundTasks {
            shutdown,
            collector,
            adjuster,
        });
        info!(
            base_limit = self.inner.config.base_concurrent_limit,
            max_limit = self.inner.config.max_concurrent_limit,
            min_limit = self.inner.config.min_concurrent_limit,
            "admission controller started"
        );
        Ok(())
    }

    /// `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.inner.tasks.lock().is_some()
    }

    /// Stop the background loops, waiting at most `shutdown_timeout_seconds`.
    pub async fn stop(&self) {
        self.stop_with_timeout(self.inner.config.shutdown_timeout())
            .await;
    }

    /// Stop the background loops, waiting at most `timeout` for them to exit.
    ///
    /// Loops still running after `timeout` are aborted and a warning is
    /// logged; this never fails. Admissions in progress are unaffected.
    pub async fn stop_with_timeout(&self, timeout: Duration) {
        let tasks = self.inner.tasks.lock().take();
        let Some(BackgroundTasks {
            shutdown,
            mut collector,
            mut adjuster,
        }) = tasks
        else {
            debug!("admission controller not running");
            return;
        };

        let _ = shutdown.send(true);
        let joined = tokio::time::timeout(timeout, async {
            let collector_ok = loop_exited_cleanly("metrics collector", (&mut collector).await);
            let adjuster_ok = loop_exited_cleanly("limit adjuster", (&mut adjuster).await);
            collector_ok && adjuster_ok
        })
        .await;

        match joined {
            Ok(true) => info!("admission controller stopped"),
            Ok(false) => warn!("admission controller stopped after a background loop failure"),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "background loops did not stop in time, aborting"
                );
                collector.abort();
                adjuster.abort();
            }
        }
    }

    // ── Admission ─────────────────────────────────────────────────────────

    /// Decide whether `stream_id` may start work, reporting how.
    pub async fn admit(&self, stream_id: &str, priority: Priority, force: bool) -> AdmissionDecision {
        let (decision, active) = self.inner.gate.admit(stream_id, priority, force);
        self.inner.stats.record_decision(decision);
        self.inner.stats.record_concurrency(active);
        metrics::inc_decision(decision);
        metrics::set_active_streams(active);

        match decision {
            AdmissionDecision::Admitted(source) => {
                debug!(stream_id, %priority, ?source, active, "stream admitted");
            }
            AdmissionDecision::AlreadyActive => {
                debug!(stream_id, %priority, "stream already active");
            }
            AdmissionDecision::Rejected => {
                debug!(stream_id, %priority, force, active, "stream rejected");
            }
        }
        decision
    }

    /// Decide whether `stream_id` may start work.
    ///
    /// Returns `false` when the stream cannot be admitted right now; this is
    /// the normal backpressure signal and the caller decides whether to
    /// retry, drop or degrade.
    pub async fn acquire(&self, stream_id: &str, priority: Priority, force: bool) -> bool {
        self.admit(stream_id, priority, force).await.is_admitted()
    }

    /// Return the permit held by `stream_id` to the pool it came from.
    ///
    /// Releasing a stream that is not active is logged and ignored.
    pub async fn release(&self, stream_id: &str) {
        match self.inner.gate.release(stream_id) {
            Some((source, active)) => {
                self.inner.stats.record_concurrency(active);
                metrics::set_active_streams(active);
                debug!(stream_id, ?source, active, "stream released");
            }
            None => warn!(stream_id, "release of inactive stream ignored"),
        }
    }

    /// Merge dispatcher-reported metrics into a known stream's record.
    ///
    /// Unknown streams are ignored; records are only created by admission.
    pub async fn update_stream_metrics(&self, stream_id: &str, update: StreamUpdate) {
        if update.is_empty() {
            return;
        }
        if !self.inner.registry.update(stream_id, &update) {
            debug!(stream_id, "metrics update for unknown stream ignored");
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// Counters, derived rates and the newest load reading.
    pub fn get_stats(&self) -> AdmissionStats {
        let counters = self.inner.stats.counters();
        let latest = self.inner.collector.latest();
        AdmissionStats {
            current_limit: self.inner.gate.current_ceiling(),
            active_streams: self.inner.gate.active_count(),
            total_requests: counters.total_requests,
            accepted: counters.accepted,
            rejected: counters.rejected,
            priority_accepted: counters.priority_accepted,
            forced: counters.forced,
            acceptance_rate: counters.acceptance_rate(),
            avg_concurrency: counters.avg_concurrency,
            peak_concurrency: counters.peak_concurrency,
            limit_adjustments: counters.limit_adjustments,
            system_cpu: latest.map_or(0.0, |s| s.cpu_fraction),
            system_memory: latest.map_or(0.0, |s| s.memory_fraction),
        }
    }

    /// Current regular-pool ceiling.
    pub fn current_limit(&self) -> usize {
        self.inner.gate.current_ceiling()
    }

    /// Copy of the ceiling, active set and last adjustment time.
    pub fn admission_state(&self) -> AdmissionState {
        self.inner.gate.state()
    }

    /// Free permits in the regular and priority pools.
    pub fn available_permits(&self) -> PoolCapacity {
        self.inner.gate.available()
    }

    /// Copy of one stream's record.
    pub fn stream(&self, stream_id: &str) -> Option<StreamRecord> {
        self.inner.registry.get(stream_id)
    }

    /// Copies of every stream record.
    pub fn streams(&self) -> Vec<StreamRecord> {
        self.inner.registry.snapshot()
    }

    /// The load collector feeding the adjuster.
    pub fn collector(&self) -> &MetricsCollector {
        &self.inner.collector
    }

    /// The limit adjuster, for driving cycles on demand.
    pub fn adjuster(&self) -> &LimitAdjuster {
        &self.inner.adjuster
    }
}

/// Log a background loop that ended by panicking or cancellation.
fn loop_exited_cleanly(name: &'static str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            warn!(loop_name = name, "background loop panicked");
            false
        }
        Err(e) => {
            warn!(loop_name = name, error = %e, "background loop did not exit cleanly");
            false
        }
    }
}
