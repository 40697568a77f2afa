//! Pacing regimes and their finalized coherence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One pacing condition within a session.
///
/// The descriptor is supplied by the host and treated as opaque.
#[derive(Debug, Clone)]
pub struct Regime {
    pub descriptor: serde_json::Value,
    /// Position of the regime within the overall session
    pub session_start_offset_ms: u64,
    /// When the regime began locally
    pub wall_clock_start: DateTime<Utc>,
}

impl Regime {
    pub fn new(session_start_offset_ms: u64, descriptor: serde_json::Value) -> Self {
        Self {
            descriptor,
            session_start_offset_ms,
            wall_clock_start: Utc::now(),
        }
    }
}

/// Average coherence for a completed regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeCoherence {
    /// Descriptor of the regime; empty when collection ran without one
    pub regime: Option<serde_json::Value>,
    pub avg_coherence: f64,
    pub session_start_offset_ms: Option<u64>,
    /// Study stage at the time of finalization (0 when never set)
    pub stage: u8,
}

/// Monotonic start of the current segment, used for the startup grace period.
#[derive(Debug, Clone, Copy)]
pub struct SegmentClock {
    started: Instant,
}

impl SegmentClock {
    pub fn start_now() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn started_at(started: Instant) -> Self {
        Self { started }
    }

    /// Whether at least `grace` has passed since the segment started.
    pub fn past_grace(&self, grace: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_grace_period() {
        let start = Instant::now();
        let clock = SegmentClock::started_at(start);
        assert!(!clock.past_grace(Duration::from_secs(30), start + Duration::from_secs(29)));
        assert!(clock.past_grace(Duration::from_secs(30), start + Duration::from_secs(30)));
        assert!(clock.past_grace(Duration::ZERO, start));
    }

    #[test]
    fn test_regime_records_offset() {
        let regime = Regime::new(5000, serde_json::json!({"pace": 6}));
        assert_eq!(regime.session_start_offset_ms, 5000);
        assert_eq!(regime.descriptor["pace"], 6);
    }
}
