//! Session state and the regime controller.
//!
//! [`TelemetrySession`] owns every piece of mutable pipeline state: the
//! decoder's suppression flag, the artifact window, the coherence accumulator,
//! the sensor-activity flag and the study stage. The connection task feeds it
//! decoded frames while the host drives it with control calls; callers share
//! it behind a single lock so both see one timeline.

use crate::config::Config;
use crate::core::{
    ArtifactWindow, CoherenceAccumulator, FinalizeOutcome, Regime, RegimeCoherence, SegmentClock,
};
use crate::diagnostics::SharedDiagnosticsLog;
use crate::protocol::{DecodedEvent, Decoder, IbiSample};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection and sensor status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    /// Retries exhausted; no further attempts will be made
    ConnectionFailure,
    /// The device operator ended the device session
    SessionEnded,
    /// Too many artifacts in the recent window
    SensorError,
}

/// Events delivered to the host, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AgentEvent {
    Status(ConnectionStatus),
    Ibi(IbiSample),
    Coherence(RegimeCoherence),
}

/// Callback invoked with each reported regime average and the current stage.
pub type CoherenceSubscriber = Box<dyn Fn(&RegimeCoherence, u8) + Send>;

/// Invalid study stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    Invalid(i64),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Invalid(n) => write!(f, "Expected stage to be 1, 2 or 3, but got {n}"),
        }
    }
}

impl std::error::Error for StageError {}

/// Session state shared between the connection task and the host.
pub type SharedSession = Arc<Mutex<TelemetrySession>>;

pub struct TelemetrySession {
    decoder: Decoder,
    artifacts: ArtifactWindow,
    coherence: CoherenceAccumulator,
    /// True only between `start_collection` and `stop_collection`
    sensor_active: bool,
    stage: u8,
    grace_period: Duration,
    artifact_limit: usize,
    subscribers: Vec<CoherenceSubscriber>,
    events: Sender<AgentEvent>,
    diagnostics: SharedDiagnosticsLog,
}

impl TelemetrySession {
    pub fn new(config: &Config, events: Sender<AgentEvent>, diagnostics: SharedDiagnosticsLog) -> Self {
        Self {
            decoder: Decoder::new(),
            artifacts: ArtifactWindow::new(config.artifact_window),
            coherence: CoherenceAccumulator::new(config.min_coherence_samples),
            sensor_active: false,
            stage: 0,
            grace_period: config.grace_period,
            artifact_limit: config.artifact_limit,
            subscribers: Vec::new(),
            events,
            diagnostics,
        }
    }

    /// Register a coherence subscriber.
    ///
    /// Subscribers run in registration order while the session lock is held,
    /// so they must not call back into the session.
    pub fn subscribe(&mut self, callback: CoherenceSubscriber) {
        self.subscribers.push(callback);
    }

    pub fn emit_status(&self, status: ConnectionStatus) {
        self.emit(AgentEvent::Status(status));
    }

    /// Decode one complete frame and act on it.
    pub fn handle_frame(&mut self, text: &str) {
        self.handle_frame_at(text, Instant::now());
    }

    pub fn handle_frame_at(&mut self, text: &str, now: Instant) {
        match self.decoder.decode(text) {
            DecodedEvent::Ignored => {}
            DecodedEvent::SessionEnded => {
                self.diagnostics.record_frame_decoded();
                info!("sensor reported end of session");
                self.emit_status(ConnectionStatus::SessionEnded);
            }
            DecodedEvent::Ibi(sample) => {
                self.diagnostics.record_frame_decoded();
                self.handle_sample(sample, now);
            }
        }
    }

    fn handle_sample(&mut self, sample: IbiSample, now: Instant) {
        // Data can still arrive after the host asked us to stop
        if !self.sensor_active {
            self.diagnostics.record_sample_dropped();
            return;
        }

        self.emit(AgentEvent::Ibi(sample.clone()));
        self.diagnostics.record_sample_forwarded();

        let past_grace = self
            .coherence
            .clock()
            .map(|clock| clock.past_grace(self.grace_period, now))
            .unwrap_or(false);
        if !past_grace {
            return;
        }

        if let Some(is_artifact) = sample.is_artifact {
            self.artifacts.push(is_artifact);
            if is_artifact {
                self.diagnostics.record_artifact_sample();
            }
            if self.artifacts.exceeds(self.artifact_limit) {
                warn!(
                    artifacts = self.artifacts.artifact_count(),
                    window = self.artifacts.len(),
                    "artifact limit exceeded"
                );
                self.diagnostics.record_sensor_error();
                self.emit_status(ConnectionStatus::SensorError);
            }
        }

        if let Some(raw) = sample.coherence_raw {
            self.coherence.push(raw as f64);
        }
    }

    /// The host moved to a new pacing regime.
    ///
    /// Any regime other than the first (offset 0) closes out the previous one
    /// before the new descriptor takes over.
    pub fn regime_changed(&mut self, session_start_offset_ms: u64, descriptor: serde_json::Value) {
        if session_start_offset_ms != 0 {
            self.finalize_regime();
        }
        debug!(offset_ms = session_start_offset_ms, regime = %descriptor, "regime started");
        self.coherence
            .begin_regime(Regime::new(session_start_offset_ms, descriptor));
    }

    /// Begin accepting pulse-sensor data.
    pub fn start_collection(&mut self) {
        self.artifacts.clear();
        self.decoder.clear_suppression();
        self.sensor_active = true;
        self.coherence.restart_clock(SegmentClock::start_now());
    }

    /// Stop accepting pulse-sensor data and close out the current regime.
    pub fn stop_collection(&mut self) -> FinalizeOutcome {
        // The device echoes a session end when we stop it ourselves
        self.decoder.suppress_next_session_end();
        self.sensor_active = false;
        self.finalize_regime()
    }

    /// Drop sensor activity without finalizing, used on teardown.
    pub fn deactivate(&mut self) {
        self.sensor_active = false;
    }

    pub fn set_stage(&mut self, stage: i64) -> Result<(), StageError> {
        if !(1..=3).contains(&stage) {
            return Err(StageError::Invalid(stage));
        }
        self.stage = stage as u8;
        Ok(())
    }

    pub fn stage(&self) -> u8 {
        self.stage
    }

    pub fn is_collecting(&self) -> bool {
        self.sensor_active
    }

    pub fn artifacts(&self) -> &ArtifactWindow {
        &self.artifacts
    }

    pub fn coherence(&self) -> &CoherenceAccumulator {
        &self.coherence
    }

    /// Report the current regime's average coherence, or discard it.
    pub fn finalize_regime(&mut self) -> FinalizeOutcome {
        let stage = self.stage;
        let subscribers = &self.subscribers;

        let outcome = self.coherence.finalize(stage, |record| {
            for subscriber in subscribers {
                subscriber(record, stage);
            }
        });

        match &outcome {
            FinalizeOutcome::Emitted(record) => {
                // Subscribers first, then the host stream
                self.emit(AgentEvent::Coherence(record.clone()));
                self.diagnostics.record_regime_finalized();
                info!(
                    regime = ?record.regime,
                    offset_ms = ?record.session_start_offset_ms,
                    avg_coherence = record.avg_coherence,
                    "regime coherence reported"
                );
            }
            FinalizeOutcome::Discarded {
                regime,
                session_start_offset_ms,
                sample_count,
            } => {
                self.diagnostics.record_regime_discarded();
                warn!(
                    regime = ?regime,
                    offset_ms = ?session_start_offset_ms,
                    coherence_values = sample_count,
                    "regime ended with less than three minutes of data; average not reported"
                );
            }
        }

        outcome
    }

    fn emit(&self, event: AgentEvent) {
        // The host may have gone away during shutdown
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
