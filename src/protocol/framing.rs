//! Recovery of complete frames from a chunked TCP byte stream.
//!
//! The device does not length-prefix its messages, and a read may return half a
//! frame or several frames at once. Text is accumulated until a frame
//! terminator (`/>` or `</IBI>`) is seen.

/// Tails longer than this without a terminator are dropped.
pub const MAX_PENDING_BYTES: usize = 8 * 1024;

const TERMINATORS: [&[u8]; 2] = [b"/>", b"</IBI>"];

/// Accumulates inbound bytes and splits them into complete frames.
///
/// Bytes are only decoded as UTF-8 once a whole frame is present, so a
/// multi-byte character split across reads survives intact.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.next_frame_end() {
            let bytes: Vec<u8> = self.pending.drain(..end).collect();
            let text = String::from_utf8_lossy(&bytes);
            let frame = text.trim();
            if !frame.is_empty() {
                frames.push(frame.to_string());
            }
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::debug!(
                pending = self.pending.len(),
                "discarding unterminated sensor text"
            );
            self.pending.clear();
        }

        frames
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn next_frame_end(&self) -> Option<usize> {
        TERMINATORS
            .iter()
            .filter_map(|t| {
                self.pending
                    .windows(t.len())
                    .position(|w| w == *t)
                    .map(|pos| pos + t.len())
            })
            .min()
    }
}
