/// Line framing for raw scale telemetry
const MAX_PENDING_BYTES: usize = 4096;

/// Collects socket bytes and yields complete frames.
///
/// Either `\n` or `\r` ends a frame, so `\r\n`, `\n` and bare `\r` devices
/// all work. The empty piece between `\r` and `\n` is discarded.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and drain every frame that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self
            .pending
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = decode_frame(&line) {
                frames.push(frame);
            }
        }

        // A device that never ends a frame must not grow the buffer forever
        if self.pending.len() > MAX_PENDING_BYTES {
            let line = std::mem::take(&mut self.pending);
            if let Some(frame) = decode_frame(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Take whatever partial frame is left, e.g. when the peer closes.
    pub fn flush(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        decode_frame(&line)
    }
}

/// Decode bytes as text, dropping undecodable sequences, and trim.
///
/// Returns `None` when nothing printable is left.
pub fn decode_frame(bytes: &[u8]) -> Option<String> {
    let text: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
