//! Typed messages exchanged with the emWave sensor process.
//!
//! Inbound frames decode to [`DecodedEvent`]; outbound commands are the
//! literal tags in [`SensorCommand`].

use serde::{Deserialize, Serialize};

/// Whether an inter-beat interval was measured or interpolated by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IbiKind {
    /// Carried in a `D01` record, resampled by the device at ~2 Hz
    Interpolated,
    /// A bare `<IBI>` tag, one per detected heartbeat
    Real,
}

/// One heartbeat interval reading.
///
/// Only `D01` records carry session time, coherence proxy and artifact flag;
/// real IBI tags leave them empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbiSample {
    /// Milliseconds since the device session started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_time_ms: Option<u64>,
    /// Raw coherence proxy (`EP` attribute)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coherence_raw: Option<u64>,
    /// Inter-beat interval in milliseconds
    pub ibi_ms: u64,
    pub ibi_kind: IbiKind,
    /// Whether the device flagged this beat as unreliable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_artifact: Option<bool>,
}

impl IbiSample {
    /// Create an interpolated sample from a `D01` record.
    pub fn interpolated(
        session_time_ms: u64,
        coherence_raw: u64,
        ibi_ms: u64,
        is_artifact: bool,
    ) -> Self {
        Self {
            session_time_ms: Some(session_time_ms),
            coherence_raw: Some(coherence_raw),
            ibi_ms,
            ibi_kind: IbiKind::Interpolated,
            is_artifact: Some(is_artifact),
        }
    }

    /// Create a real (measured) sample from a bare `<IBI>` tag.
    pub fn real(ibi_ms: u64) -> Self {
        Self {
            session_time_ms: None,
            coherence_raw: None,
            ibi_ms,
            ibi_kind: IbiKind::Real,
            is_artifact: None,
        }
    }
}

/// Result of decoding one frame of sensor text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedEvent {
    Ibi(IbiSample),
    /// The device ended its own session
    SessionEnded,
    /// Nothing interpretable in the frame
    Ignored,
}

/// Commands written to the sensor socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    StartPulseSensor,
    StopPulseSensor,
}

impl SensorCommand {
    /// The literal ASCII tag sent on the wire.
    pub fn as_wire(&self) -> &'static str {
        match self {
            SensorCommand::StartPulseSensor => "<CMD ID=2 />",
            SensorCommand::StopPulseSensor => "<CMD ID=3 />",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_sample_has_no_session_fields() {
        let sample = IbiSample::real(1139);
        assert_eq!(sample.ibi_kind, IbiKind::Real);
        assert!(sample.session_time_ms.is_none());
        assert!(sample.coherence_raw.is_none());
        assert!(sample.is_artifact.is_none());
    }

    #[test]
    fn test_real_sample_json_omits_empty_fields() {
        let json = serde_json::to_value(IbiSample::real(900)).unwrap();
        assert_eq!(json["ibi_ms"], 900);
        assert_eq!(json["ibi_kind"], "real");
        assert!(json.get("coherence_raw").is_none());
        assert!(json.get("is_artifact").is_none());
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(SensorCommand::StartPulseSensor.as_wire(), "<CMD ID=2 />");
        assert_eq!(SensorCommand::StopPulseSensor.as_wire(), "<CMD ID=3 />");
    }
}
