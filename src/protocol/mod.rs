//! Wire protocol spoken by the emWave sensor process.
//!
//! Plain text over a local TCP socket, recognised by pattern matching.

pub mod decoder;
pub mod framing;
pub mod types;

// Re-export commonly used types
pub use decoder::{decode_frame, Decoder};
pub use framing::FrameAssembler;
pub use types::{DecodedEvent, IbiKind, IbiSample, SensorCommand};
