//! Decoding of emWave text frames.
//!
//! The device speaks loosely structured XML-ish text. Frames are recognised by
//! pattern rather than parsed, so anything unexpected simply decodes to
//! [`DecodedEvent::Ignored`].
//!
//! Sample frames:
//!
//! ```text
//! <D01 NAME="Pat" LVL="1" SSTAT="2" STIME="2000" S="0" AS="0" EP="0" IBI="1051" ART="FALSE" HR="0" />
//! <IBI> 1139 </IBI>
//! <CMD ID="3" FROM="::ffff:127.0.0.1:APP" />
//! ```

use crate::protocol::types::{DecodedEvent, IbiSample};
use regex::Regex;
use std::sync::OnceLock;

fn data_record_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<D01.* STIME="([0-9]+)" .*EP="([0-9]+)" .*IBI="([0-9]+)" ART="(TRUE|FALSE)""#)
            .expect("D01 pattern is valid")
    })
}

fn real_ibi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<IBI>\s*([0-9]+)\s*</IBI>").expect("IBI pattern is valid")
    })
}

fn session_end_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<CMD ID="3" FROM="::ffff:127\.0\.0\.1:APP""#)
            .expect("session end pattern is valid")
    })
}

/// Decode a frame of sensor text without any session context.
///
/// Shapes are tried in priority order: `D01` record, bare `<IBI>` tag,
/// session-end command. This function is pure; the same input always yields
/// the same event.
pub fn decode_frame(text: &str) -> DecodedEvent {
    if let Some(caps) = data_record_pattern().captures(text) {
        // STIME of 0 means the device has no active session
        if &caps[1] == "0" {
            return DecodedEvent::Ignored;
        }
        let parsed = (
            caps[1].parse::<u64>(),
            caps[2].parse::<u64>(),
            caps[3].parse::<u64>(),
        );
        return match parsed {
            (Ok(stime), Ok(ep), Ok(ibi)) => {
                DecodedEvent::Ibi(IbiSample::interpolated(stime, ep, ibi, &caps[4] == "TRUE"))
            }
            _ => DecodedEvent::Ignored,
        };
    }

    if let Some(caps) = real_ibi_pattern().captures(text) {
        return match caps[1].parse::<u64>() {
            Ok(ibi) => DecodedEvent::Ibi(IbiSample::real(ibi)),
            Err(_) => DecodedEvent::Ignored,
        };
    }

    if session_end_pattern().is_match(text) {
        return DecodedEvent::SessionEnded;
    }

    DecodedEvent::Ignored
}

/// Frame decoder that carries the session-end suppression flag.
///
/// When the agent itself stops the pulse sensor, the device echoes a
/// session-end command. The flag swallows exactly one such echo so it is not
/// reported as an operator-initiated end.
#[derive(Debug, Default)]
pub struct Decoder {
    suppress_session_end: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swallow the next session-end frame.
    pub fn suppress_next_session_end(&mut self) {
        self.suppress_session_end = true;
    }

    /// Report session-end frames again.
    pub fn clear_suppression(&mut self) {
        self.suppress_session_end = false;
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppress_session_end
    }

    /// Decode a frame, consuming the suppression flag on a session-end echo.
    pub fn decode(&mut self, text: &str) -> DecodedEvent {
        match decode_frame(text) {
            DecodedEvent::SessionEnded if self.suppress_session_end => {
                self.suppress_session_end = false;
                DecodedEvent::Ignored
            }
            event => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::IbiKind;

    const D01_ACTIVE: &str = r#"<D01 NAME="Pat" LVL="1" SSTAT="2" STIME="2000" S="0" AS="0" EP="7" IBI="1051" ART="FALSE" HR="0" />"#;
    const SESSION_END: &str = r#"<CMD ID="3" FROM="::ffff:127.0.0.1:APP" />"#;

    #[test]
    fn test_d01_record_decodes_to_interpolated_sample() {
        match decode_frame(D01_ACTIVE) {
            DecodedEvent::Ibi(sample) => {
                assert_eq!(sample.session_time_ms, Some(2000));
                assert_eq!(sample.coherence_raw, Some(7));
                assert_eq!(sample.ibi_ms, 1051);
                assert_eq!(sample.ibi_kind, IbiKind::Interpolated);
                assert_eq!(sample.is_artifact, Some(false));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_artifact_flag_follows_art_attribute() {
        let frame = D01_ACTIVE.replace(r#"ART="FALSE""#, r#"ART="TRUE""#);
        match decode_frame(&frame) {
            DecodedEvent::Ibi(sample) => assert_eq!(sample.is_artifact, Some(true)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_zero_session_time_is_ignored() {
        for art in ["TRUE", "FALSE"] {
            for ep in ["0", "12"] {
                let frame = format!(
                    r#"<D01 NAME="Pat" LVL="1" SSTAT="2" STIME="0" S="0" AS="0" EP="{ep}" IBI="1051" ART="{art}" HR="0" />"#
                );
                assert_eq!(decode_frame(&frame), DecodedEvent::Ignored);
            }
        }
    }

    #[test]
    fn test_bare_ibi_tag_decodes_to_real_sample() {
        assert_eq!(
            decode_frame("<IBI> 1139 </IBI>"),
            DecodedEvent::Ibi(IbiSample::real(1139))
        );
    }

    #[test]
    fn test_session_end_command() {
        assert_eq!(decode_frame(SESSION_END), DecodedEvent::SessionEnded);
    }

    #[test]
    fn test_malformed_and_partial_frames_are_ignored() {
        assert_eq!(decode_frame(""), DecodedEvent::Ignored);
        assert_eq!(decode_frame("garbage"), DecodedEvent::Ignored);
        assert_eq!(decode_frame(r#"<D01 NAME="Pat" STIME="2000" "#), DecodedEvent::Ignored);
        assert_eq!(decode_frame("<IBI> 11"), DecodedEvent::Ignored);
        assert_eq!(decode_frame("<IBI> 99999999999999999999999 </IBI>"), DecodedEvent::Ignored);
        assert_eq!(decode_frame("<CMD ID=\"2\" />"), DecodedEvent::Ignored);
    }

    #[test]
    fn test_decode_is_idempotent() {
        for frame in [D01_ACTIVE, "<IBI> 1139 </IBI>", SESSION_END, "noise"] {
            assert_eq!(decode_frame(frame), decode_frame(frame));
        }
    }

    #[test]
    fn test_suppression_swallows_one_echo() {
        let mut decoder = Decoder::new();
        decoder.suppress_next_session_end();
        assert_eq!(decoder.decode(SESSION_END), DecodedEvent::Ignored);
        assert!(!decoder.is_suppressing());
        assert_eq!(decoder.decode(SESSION_END), DecodedEvent::SessionEnded);
    }

    #[test]
    fn test_double_suppression_consumes_single_echo() {
        let mut decoder = Decoder::new();
        decoder.suppress_next_session_end();
        decoder.suppress_next_session_end();
        assert_eq!(decoder.decode(SESSION_END), DecodedEvent::Ignored);
        assert_eq!(decoder.decode(SESSION_END), DecodedEvent::SessionEnded);
    }

    #[test]
    fn test_suppression_does_not_affect_samples() {
        let mut decoder = Decoder::new();
        decoder.suppress_next_session_end();
        assert!(matches!(decoder.decode(D01_ACTIVE), DecodedEvent::Ibi(_)));
        assert!(decoder.is_suppressing());
    }
}
