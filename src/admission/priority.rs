//! Stream priority tiers.

use serde::{Deserialize, Serialize};

/// Priority of a conversation stream.
///
/// `High` and `Critical` streams may draw from the reserved priority pool;
/// `Critical` streams additionally bypass the regular pool and fall through
/// to forced admission when the priority pool is exhausted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background / batch work.
    Low = 0,
    /// Standard priority for most streams.
    #[default]
    Normal = 1,
    /// Elevated priority, eligible for the priority pool and force dispatch.
    High = 2,
    /// Highest priority, always admitted while below the hard cap.
    Critical = 3,
}

impl Priority {
    /// Parse a priority level from a name string (`"low"`, `"normal"`, `"high"`, `"critical"`).
    ///
    /// Returns `None` for unrecognised strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// `true` for tiers that may draw from the reserved priority pool.
    pub fn uses_priority_pool(self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}
