//! Line framing for controller output
//!
//! GRBL terminates every response with `\r\n`. Reads from a serial port
//! return arbitrary chunks, so bytes are accumulated here until a full line
//! is available.

/// Default cap on an unterminated line before it is discarded
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// Accumulates raw bytes and yields complete lines
#[derive(Debug)]
pub struct LineAssembler {
    partial: Vec<u8>,
    max_line_bytes: usize,
    overflowed: bool,
}

impl LineAssembler {
    /// Create an assembler with the default line cap
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create an assembler that discards lines longer than `max_line_bytes`
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            overflowed: false,
        }
    }

    /// Feed a chunk of bytes, returning every line it completes
    ///
    /// Lines are split on `\n`, a trailing `\r` is stripped, blank lines are
    /// dropped, and invalid UTF-8 is replaced.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if self.overflowed {
                    self.overflowed = false;
                    self.partial.clear();
                    continue;
                }
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
                continue;
            }

            if self.overflowed {
                continue;
            }

            if self.partial.len() >= self.max_line_bytes {
                tracing::warn!(
                    "Discarding unterminated line longer than {} bytes",
                    self.max_line_bytes
                );
                self.partial.clear();
                self.overflowed = true;
                continue;
            }

            self.partial.push(byte);
        }

        lines
    }

    /// Bytes held for the current unterminated line
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.partial.clear();
        self.overflowed = false;
    }

    fn take_line(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}
