//! Collection statistics for a telemetry session.
//!
//! Counters only; no physiological values are kept here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Running counters for the current agent run.
#[derive(Debug)]
pub struct DiagnosticsLog {
    /// Frames that decoded to something other than `Ignored`
    frames_decoded: AtomicU64,
    /// Samples forwarded to the host
    samples_forwarded: AtomicU64,
    /// Samples dropped because collection was stopped
    samples_dropped: AtomicU64,
    /// Aggregated samples flagged as artifacts
    artifact_samples: AtomicU64,
    /// Sensor error statuses emitted
    sensor_errors: AtomicU64,
    /// Regimes whose average was reported
    regimes_finalized: AtomicU64,
    /// Regimes discarded for insufficient data
    regimes_discarded: AtomicU64,
    /// Identifier of this run
    run_id: Uuid,
    run_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl DiagnosticsLog {
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            samples_forwarded: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            artifact_samples: AtomicU64::new(0),
            sensor_errors: AtomicU64::new(0),
            regimes_finalized: AtomicU64::new(0),
            regimes_discarded: AtomicU64::new(0),
            run_id: Uuid::new_v4(),
            run_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that loads and saves cumulative counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous diagnostics");
        }

        log
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_forwarded(&self) {
        self.samples_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_artifact_sample(&self) {
        self.artifact_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_error(&self) {
        self.sensor_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regime_finalized(&self) {
        self.regimes_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regime_discarded(&self) {
        self.regimes_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            samples_forwarded: self.samples_forwarded.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            artifact_samples: self.artifact_samples.load(Ordering::Relaxed),
            sensor_errors: self.sensor_errors.load(Ordering::Relaxed),
            regimes_finalized: self.regimes_finalized.load(Ordering::Relaxed),
            regimes_discarded: self.regimes_discarded.load(Ordering::Relaxed),
            run_id: self.run_id,
            run_start: self.run_start,
            run_duration_secs: (Utc::now() - self.run_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Diagnostics ({}):\n\
             - Frames decoded: {}\n\
             - Samples forwarded: {}\n\
             - Samples dropped after stop: {}\n\
             - Artifact samples: {}\n\
             - Sensor errors: {}\n\
             - Regimes finalized: {}\n\
             - Regimes discarded (insufficient data): {}\n\
             - Run duration: {} seconds",
            stats.run_id,
            stats.frames_decoded,
            stats.samples_forwarded,
            stats.samples_dropped,
            stats.artifact_samples,
            stats.sensor_errors,
            stats.regimes_finalized,
            stats.regimes_discarded,
            stats.run_duration_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_decoded: stats.frames_decoded,
                samples_forwarded: stats.samples_forwarded,
                samples_dropped: stats.samples_dropped,
                artifact_samples: stats.artifact_samples,
                sensor_errors: stats.sensor_errors,
                regimes_finalized: stats.regimes_finalized,
                regimes_discarded: stats.regimes_discarded,
                last_run_id: stats.run_id,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_decoded
                    .store(persisted.frames_decoded, Ordering::Relaxed);
                self.samples_forwarded
                    .store(persisted.samples_forwarded, Ordering::Relaxed);
                self.samples_dropped
                    .store(persisted.samples_dropped, Ordering::Relaxed);
                self.artifact_samples
                    .store(persisted.artifact_samples, Ordering::Relaxed);
                self.sensor_errors
                    .store(persisted.sensor_errors, Ordering::Relaxed);
                self.regimes_finalized
                    .store(persisted.regimes_finalized, Ordering::Relaxed);
                self.regimes_discarded
                    .store(persisted.regimes_discarded, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of diagnostics counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub frames_decoded: u64,
    pub samples_forwarded: u64,
    pub samples_dropped: u64,
    pub artifact_samples: u64,
    pub sensor_errors: u64,
    pub regimes_finalized: u64,
    pub regimes_discarded: u64,
    pub run_id: Uuid,
    pub run_start: DateTime<Utc>,
    pub run_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_decoded: u64,
    samples_forwarded: u64,
    samples_dropped: u64,
    artifact_samples: u64,
    sensor_errors: u64,
    regimes_finalized: u64,
    regimes_discarded: u64,
    last_run_id: Uuid,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared diagnostics log.
pub type SharedDiagnosticsLog = Arc<DiagnosticsLog>;

pub fn create_shared_log() -> SharedDiagnosticsLog {
    Arc::new(DiagnosticsLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedDiagnosticsLog {
    Arc::new(DiagnosticsLog::with_persistence(path))
}
