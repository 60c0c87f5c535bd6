//! Byte-chunk to line reassembly
//!
//! HTTP bodies arrive in arbitrary byte ranges. [`LineBuffer`] holds the
//! unterminated tail until a `\n` arrives, so a line (or a multibyte
//! UTF-8 character) split across chunks is only decoded once complete.

use bytes::BytesMut;

/// Accumulates bytes and yields complete `\n`-terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    ///
    /// Lines are returned without the trailing `\n` or `\r\n`. Lines that
    /// are not valid UTF-8 are dropped with a debug log.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(pos + 1);
            if let Some(line) = decode_line(&raw[..pos]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush the unterminated tail at end of input
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest).filter(|line| !line.is_empty())
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => Some(line.to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "Dropping non-UTF-8 line");
            None
        }
    }
}
