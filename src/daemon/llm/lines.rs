//! Reassembly of newline-delimited records from arbitrary byte chunks.
//!
//! Chunk boundaries from the HTTP body do not line up with record boundaries,
//! and may split a multi-byte character. Bytes are buffered until a full line
//! is available.

use tracing::warn;

/// Longest line kept. Leaves room for the final line's context array on
/// large context windows.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Accumulates bytes and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line; bytes are dropped up to the next newline.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed a chunk and return every line it completes.
    ///
    /// Blank lines are dropped and trailing `\r` is stripped. A line longer
    /// than the limit is dropped whole.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if self.discarding {
                self.discarding = false;
            } else if end - start > self.max_line {
                warn!("Dropping {} byte line from Ollama: over the line limit", end - start);
            } else if let Some(line) = decode(&self.pending[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line {
            if !self.discarding {
                warn!(
                    "Dropping partial line from Ollama: over {} bytes without a newline",
                    self.max_line
                );
            }
            self.pending.clear();
            self.discarding = true;
        }
        lines
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        decode(&rest)
    }
}

fn decode(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
