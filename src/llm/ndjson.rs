//! Incremental newline-delimited JSON decoder
//!
//! Network chunks arrive at arbitrary byte boundaries. Lines are split on
//! raw bytes and only complete lines are UTF-8 decoded, so a multi-byte
//! character that straddles two chunks is never mangled.

use super::types::StreamRecord;

/// Outcome of decoding one complete line.
#[derive(Debug)]
pub enum Decoded {
    Record(StreamRecord),
    /// Line that was not a valid record; carries the raw text for logging.
    Malformed { line: String, error: String },
}

/// Buffers partial lines between network chunks.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every record completed by this chunk.
    /// Blank lines are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(decoded) = decode_line(&line) {
                out.push(decoded);
            }
        }
        out
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the decoder, returning the unterminated trailing fragment.
    pub fn into_remainder(self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

fn decode_line(raw: &[u8]) -> Option<Decoded> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<StreamRecord>(line) {
        Ok(record) => Decoded::Record(record),
        Err(e) => Decoded::Malformed {
            line: line.to_string(),
            error: e.to_string(),
        },
    })
}
