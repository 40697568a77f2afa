//! Sliding window of recent artifact flags.
//!
//! The device reports roughly two interpolated samples per second, so the
//! default window of 120 flags covers the last minute of signal.

use std::collections::VecDeque;

/// Default number of flags tracked (~60 s at 2 samples/s).
pub const DEFAULT_WINDOW: usize = 120;

/// Default artifact count above which the sensor is considered noisy.
pub const DEFAULT_LIMIT: usize = 60;

/// Fixed-capacity ring of artifact flags; the oldest flag is overwritten first.
#[derive(Debug, Clone)]
pub struct ArtifactWindow {
    flags: VecDeque<bool>,
    capacity: usize,
}

impl ArtifactWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            flags: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one flag, evicting the oldest if the window is full.
    pub fn push(&mut self, is_artifact: bool) {
        if self.capacity == 0 {
            return;
        }
        if self.flags.len() == self.capacity {
            self.flags.pop_front();
        }
        self.flags.push_back(is_artifact);
    }

    /// Number of `true` flags currently in the window.
    pub fn artifact_count(&self) -> usize {
        self.flags.iter().filter(|&&flag| flag).count()
    }

    /// Whether the artifact count is strictly above `limit`.
    pub fn exceeds(&self, limit: usize) -> bool {
        self.artifact_count() > limit
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }

    /// Flags from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.flags.iter().copied()
    }
}

impl Default for ArtifactWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
