//! Core aggregation state for the telemetry pipeline.
//!
//! This module contains:
//! - The sliding artifact window used to detect a noisy sensor
//! - The per-regime coherence accumulator
//! - Regime descriptors and finalized coherence records

pub mod artifacts;
pub mod coherence;
pub mod regime;

// Re-export commonly used types
pub use artifacts::ArtifactWindow;
pub use coherence::{CoherenceAccumulator, FinalizeOutcome};
pub use regime::{Regime, RegimeCoherence, SegmentClock};
