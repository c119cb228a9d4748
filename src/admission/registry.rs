//! Per-stream metadata.
//!
//! Records are created on the first admission attempt for a stream id and
//! feed the force-dispatch heuristic and external reporting. They are not
//! evicted unless an idle TTL is configured.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::Priority;

/// Metadata tracked for one conversation stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    /// Unique stream identifier.
    pub stream_id: String,
    /// Priority most recently requested or assigned.
    pub priority: Priority,
    /// Messages per second reported by the dispatcher.
    pub message_rate: f64,
    /// Average response time reported by the dispatcher.
    pub avg_response_time: Duration,
    /// Last admission attempt or reported activity.
    pub last_activity: Instant,
    /// Consecutive failed responses reported by the dispatcher.
    pub consecutive_failures: u32,
    /// `true` while the stream holds an admission.
    pub active: bool,
    /// Admission attempts seen for this stream.
    pub total_requests: u64,
    /// When the record was created.
    pub created_at: Instant,
}

impl StreamRecord {
    fn new(stream_id: &str, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            stream_id: stream_id.to_string(),
            priority,
            message_rate: 0.0,
            avg_response_time: Duration::ZERO,
            last_activity: now,
            consecutive_failures: 0,
            active: false,
            total_requests: 0,
            created_at: now,
        }
    }

    fn apply(&mut self, update: &StreamUpdate) {
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(rate) = update.message_rate {
            self.message_rate = rate;
        }
        if let Some(rt) = update.response_time {
            self.avg_response_time = rt;
        }
        if let Some(at) = update.last_activity {
            self.last_activity = at;
        }
        if let Some(failures) = update.consecutive_failures {
            self.consecutive_failures = failures;
        }
    }
}

/// Partial update over the mutable fields of a [`StreamRecord`].
///
/// Unset fields are left untouched.
///
/// ```rust
/// use adaptive_admission::{Priority, StreamUpdate};
/// use std::time::Duration;
///
/// let update = StreamUpdate::new()
///     .priority(Priority::High)
///     .response_time(Duration::from_secs(7));
/// assert!(update.message_rate.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamUpdate {
    /// New priority.
    pub priority: Option<Priority>,
    /// New message rate.
    pub message_rate: Option<f64>,
    /// New average response time.
    pub response_time: Option<Duration>,
    /// New last-activity instant.
    pub last_activity: Option<Instant>,
    /// New consecutive failure count.
    pub consecutive_failures: Option<u32>,
}

impl StreamUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the message rate.
    pub fn message_rate(mut self, rate: f64) -> Self {
        self.message_rate = Some(rate);
        self
    }

    /// Set the average response time.
    pub fn response_time(mut self, rt: Duration) -> Self {
        self.response_time = Some(rt);
        self
    }

    /// Set the last-activity instant.
    pub fn last_activity(mut self, at: Instant) -> Self {
        self.last_activity = Some(at);
        self
    }

    /// Set the consecutive failure count.
    pub fn consecutive_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = Some(failures);
        self
    }

    /// `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Concurrent map of stream id to [`StreamRecord`].
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<String, StreamRecord>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the record for `stream_id`, creating it with
    /// `priority` if absent.
    pub fn get_or_create(&self, stream_id: &str, priority: Priority) -> StreamRecord {
        self.streams
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                debug!(stream_id, %priority, "stream registered");
                StreamRecord::new(stream_id, priority)
            })
            .clone()
    }

    /// Copy of the record for `stream_id`.
    pub fn get(&self, stream_id: &str) -> Option<StreamRecord> {
        self.streams.get(stream_id).map(|r| r.clone())
    }

    /// Merge `update` into an existing record.
    ///
    /// Returns `false` if the stream is unknown; no record is created.
    pub fn update(&self, stream_id: &str, update: &StreamUpdate) -> bool {
        match self.streams.get_mut(stream_id) {
            Some(mut record) => {
                record.apply(update);
                true
            }
            None => false,
        }
    }

    /// Mark an admitted stream active and count the attempt.
    pub(crate) fn mark_active(&self, stream_id: &str, priority: Priority) {
        let mut record = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamRecord::new(stream_id, priority));
        record.priority = priority;
        record.active = true;
        record.last_activity = Instant::now();
        record.total_requests += 1;
    }

    /// Count an attempt that did not change the active flag.
    pub(crate) fn touch(&self, stream_id: &str, priority: Priority) {
        if let Some(mut record) = self.streams.get_mut(stream_id) {
            record.priority = priority;
            record.last_activity = Instant::now();
            record.total_requests += 1;
        }
    }

    pub(crate) fn mark_inactive(&self, stream_id: &str) {
        if let Some(mut record) = self.streams.get_mut(stream_id) {
            record.active = false;
            record.last_activity = Instant::now();
        }
    }

    /// Copies of every record.
    pub fn snapshot(&self) -> Vec<StreamRecord> {
        self.streams.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of known streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// `true` if no stream is known.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Drop inactive records whose last activity is older than `ttl`.
    ///
    /// Returns the number of records removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.streams.len();
        let now = Instant::now();
        self.streams
            .retain(|_, r| r.active || now.saturating_duration_since(r.last_activity) <= ttl);
        let evicted = before.saturating_sub(self.streams.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.streams.len(), "idle streams evicted");
        }
        evicted
    }
}
