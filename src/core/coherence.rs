//! Per-regime coherence accumulation.
//!
//! Values collected while a regime runs are averaged when the regime ends.
//! Regimes with less than three minutes of data are discarded.

use crate::core::regime::{Regime, RegimeCoherence, SegmentClock};
use std::ops::Deref;

/// Minimum sample count before an average is reported (3 min at 2 samples/s).
pub const DEFAULT_MIN_SAMPLES: usize = 2 * 60 * 3;

/// What happened when a regime was finalized.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Emitted(RegimeCoherence),
    /// Too little data; nothing was reported
    Discarded {
        regime: Option<serde_json::Value>,
        session_start_offset_ms: Option<u64>,
        sample_count: usize,
    },
}

/// Coherence values and timing for the current regime.
#[derive(Debug)]
pub struct CoherenceAccumulator {
    values: Vec<f64>,
    regime: Option<Regime>,
    clock: Option<SegmentClock>,
    min_samples: usize,
}

impl CoherenceAccumulator {
    pub fn new(min_samples: usize) -> Self {
        Self {
            values: Vec::new(),
            regime: None,
            clock: None,
            min_samples,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn sample_count(&self) -> usize {
        self.values.len()
    }

    pub fn regime(&self) -> Option<&Regime> {
        self.regime.as_ref()
    }

    pub fn clock(&self) -> Option<&SegmentClock> {
        self.clock.as_ref()
    }

    /// Make `regime` current and restart the segment clock.
    pub fn begin_regime(&mut self, regime: Regime) {
        self.regime = Some(regime);
        self.clock = Some(SegmentClock::start_now());
    }

    /// Restart the segment clock without touching the regime.
    pub fn restart_clock(&mut self, clock: SegmentClock) {
        self.clock = Some(clock);
    }

    /// Close out the current regime.
    ///
    /// `notify` is called with the average when enough data was collected.
    /// Values, regime and clock are cleared on every exit path, including an
    /// unwinding `notify`.
    pub fn finalize<F>(&mut self, stage: u8, notify: F) -> FinalizeOutcome
    where
        F: FnOnce(&RegimeCoherence),
    {
        let acc = ResetGuard(self);

        let count = acc.values.len();
        if count == 0 || count < acc.min_samples {
            return FinalizeOutcome::Discarded {
                regime: acc.regime.as_ref().map(|r| r.descriptor.clone()),
                session_start_offset_ms: acc.regime.as_ref().map(|r| r.session_start_offset_ms),
                sample_count: count,
            };
        }

        let sum: f64 = acc.values.iter().sum();
        let record = RegimeCoherence {
            regime: acc.regime.as_ref().map(|r| r.descriptor.clone()),
            avg_coherence: sum / count as f64,
            session_start_offset_ms: acc.regime.as_ref().map(|r| r.session_start_offset_ms),
            stage,
        };
        notify(&record);
        FinalizeOutcome::Emitted(record)
    }

    fn reset(&mut self) {
        self.values.clear();
        self.regime = None;
        self.clock = None;
    }
}

impl Default for CoherenceAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAMPLES)
    }
}

/// Clears the accumulator when dropped.
struct ResetGuard<'a>(&'a mut CoherenceAccumulator);

impl Deref for ResetGuard<'_> {
    type Target = CoherenceAccumulator;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}
