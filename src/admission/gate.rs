//! The synchronous admit/reject decision point.
//!
//! All mutation of the active set, the per-stream permit source and the
//! regular pool's size happens under one mutex. Pools are semaphores that
//! are only ever `try_acquire`d; permits are forgotten on admission and
//! added back on release, so a permit's lifetime spans the caller's work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use super::registry::{StreamRecord, StreamRegistry};
use super::Priority;
use crate::config::AdmissionConfig;

/// Pool an admitted stream's permit was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitSource {
    /// The reserved High/Critical pool.
    Priority,
    /// The load-adjusted regular pool.
    Regular,
    /// Granted above the regular ceiling; bounded only by the hard cap.
    Forced,
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The stream was admitted with a permit from the given source.
    Admitted(PermitSource),
    /// The stream already held an admission; nothing was consumed.
    AlreadyActive,
    /// The stream was not admitted.
    Rejected,
}

impl AdmissionDecision {
    /// `true` unless the attempt was rejected.
    pub fn is_admitted(self) -> bool {
        !matches!(self, AdmissionDecision::Rejected)
    }
}

/// Copy of the gate's admission state.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionState {
    /// Current regular-pool ceiling.
    pub current_ceiling: usize,
    /// Streams currently admitted.
    pub active_stream_ids: HashSet<String>,
    /// When the ceiling last changed.
    pub last_adjustment_at: Option<Instant>,
}

/// Free permits in each pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    /// Free permits in the regular pool.
    pub regular: usize,
    /// Free permits in the priority pool.
    pub priority: usize,
}

#[derive(Debug)]
struct GateState {
    active: HashMap<String, PermitSource>,
    current_ceiling: usize,
    /// Regular permits still owed by a shrink; paid off as holders release.
    shrink_debt: usize,
    last_adjustment_at: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct AdmissionGate {
    state: Mutex<GateState>,
    regular_pool: Semaphore,
    priority_pool: Semaphore,
    registry: Arc<StreamRegistry>,
    min_ceiling: usize,
    max_ceiling: usize,
    force_activity_window: Duration,
    force_response_time: Duration,
}

impl AdmissionGate {
    pub(crate) fn new(config: &AdmissionConfig, registry: Arc<StreamRegistry>) -> Self {
        let ceiling = config.base_concurrent_limit;
        Self {
            state: Mutex::new(GateState {
                active: HashMap::new(),
                current_ceiling: ceiling,
                shrink_debt: 0,
                last_adjustment_at: None,
            }),
            regular_pool: Semaphore::new(ceiling),
            priority_pool: Semaphore::new(config.priority_pool_size),
            registry,
            min_ceiling: config.min_concurrent_limit,
            max_ceiling: config.max_concurrent_limit,
            force_activity_window: config.force_activity_window(),
            force_response_time: config.force_response_time(),
        }
    }

    /// Decide one attempt. Returns the decision and the active count after it.
    pub(crate) fn admit(
        &self,
        stream_id: &str,
        priority: Priority,
        force: bool,
    ) -> (AdmissionDecision, usize) {
        let mut state = self.state.lock();

        if state.active.contains_key(stream_id) {
            self.registry.touch(stream_id, priority);
            return (AdmissionDecision::AlreadyActive, state.active.len());
        }

        let record = self.registry.get_or_create(stream_id, priority);

        let source = if state.active.len() >= self.max_ceiling {
            None
        } else if priority.uses_priority_pool() && take(&self.priority_pool) {
            Some(PermitSource::Priority)
        } else if priority != Priority::Critical && take(&self.regular_pool) {
            Some(PermitSource::Regular)
        } else if force
            || priority == Priority::Critical
            || self.should_force_dispatch(&record, priority)
        {
            Some(PermitSource::Forced)
        } else {
            None
        };

        match source {
            Some(source) => {
                state.active.insert(stream_id.to_string(), source);
                self.registry.mark_active(stream_id, priority);
                (AdmissionDecision::Admitted(source), state.active.len())
            }
            None => {
                self.registry.touch(stream_id, priority);
                (AdmissionDecision::Rejected, state.active.len())
            }
        }
    }

    /// High priority always qualifies; otherwise a stream seen recently
    /// whose responses are slow is treated as backlogged.
    fn should_force_dispatch(&self, record: &StreamRecord, priority: Priority) -> bool {
        if priority == Priority::High {
            return true;
        }
        let recent =
            Instant::now().saturating_duration_since(record.last_activity) <= self.force_activity_window;
        recent && record.avg_response_time > self.force_response_time
    }

    /// Release `stream_id`. Returns the source its permit came from and the
    /// active count afterwards, or `None` if it was not active.
    pub(crate) fn release(&self, stream_id: &str) -> Option<(PermitSource, usize)> {
        let mut state = self.state.lock();
        let source = state.active.remove(stream_id)?;
        match source {
            PermitSource::Priority => self.priority_pool.add_permits(1),
            PermitSource::Regular => {
                if state.shrink_debt > 0 {
                    state.shrink_debt -= 1;
                } else {
                    self.regular_pool.add_permits(1);
                }
            }
            PermitSource::Forced => {}
        }
        self.registry.mark_inactive(stream_id);
        Some((source, state.active.len()))
    }

    /// Move the ceiling to `proposed` clamped into `[min, max]`.
    ///
    /// Returns `(old, new)` if the ceiling changed.
    #[cfg(test)]
    fn resize(&self, proposed: usize) -> Option<(usize, usize)> {
        self.resize_with(|_| proposed).ok()
    }

    /// Move the ceiling to `next(current)` clamped into `[min, max]`, reading
    /// the current ceiling and applying the change under one lock.
    ///
    /// Growing adds permits at once (first cancelling any outstanding shrink
    /// debt). Shrinking reclaims only free permits; the rest is recorded as
    /// debt and withheld as holders release. Returns `Ok((old, new))` if the
    /// ceiling changed, `Err(current)` otherwise.
    pub(crate) fn resize_with(
        &self,
        next: impl FnOnce(usize) -> usize,
    ) -> Result<(usize, usize), usize> {
        let mut state = self.state.lock();
        let old = state.current_ceiling;
        let new = next(old).clamp(self.min_ceiling, self.max_ceiling);
        if new == old {
            return Err(old);
        }

        if new > old {
            let grow = new - old;
            let offset = grow.min(state.shrink_debt);
            state.shrink_debt -= offset;
            self.regular_pool.add_permits(grow - offset);
        } else {
            let shrink = old - new;
            let mut reclaimed = 0;
            while reclaimed < shrink && take(&self.regular_pool) {
                reclaimed += 1;
            }
            state.shrink_debt += shrink - reclaimed;
            debug!(
                reclaimed,
                outstanding = state.shrink_debt,
                "regular pool shrink"
            );
        }

        state.current_ceiling = new;
        state.last_adjustment_at = Some(Instant::now());
        Ok((old, new))
    }

    pub(crate) fn current_ceiling(&self) -> usize {
        self.state.lock().current_ceiling
    }

    pub(crate) fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    #[cfg(test)]
    fn is_active(&self, stream_id: &str) -> bool {
        self.state.lock().active.contains_key(stream_id)
    }

    pub(crate) fn state(&self) -> AdmissionState {
        let state = self.state.lock();
        AdmissionState {
            current_ceiling: state.current_ceiling,
            active_stream_ids: state.active.keys().cloned().collect(),
            last_adjustment_at: state.last_adjustment_at,
        }
    }

    pub(crate) fn available(&self) -> PoolCapacity {
        let _state = self.state.lock();
        PoolCapacity {
            regular: self.regular_pool.available_permits(),
            priority: self.priority_pool.available_permits(),
        }
    }

    #[cfg(test)]
    fn shrink_debt(&self) -> usize {
        self.state.lock().shrink_debt
    }
}

/// Non-blocking take of one permit; the permit is forgotten and must be
/// returned with `add_permits`.
fn take(pool: &Semaphore) -> bool {
    match pool.try_acquire() {
        Ok(permit) => {
            permit.forget();
            true
        }
        Err(_) => false,
    }
}
