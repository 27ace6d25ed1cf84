//! Byte-chunk to line assembly for process output pipes.
//!
//! Pipe reads arrive in arbitrary chunks that rarely align with line
//! boundaries. `LineBuffer` accumulates bytes and hands back complete lines,
//! carrying the trailing partial line from one chunk into the next.

/// Accumulates raw output bytes and yields complete lines.
///
/// Line terminators are `\n`; a trailing `\r` is stripped so CRLF output
/// reads the same as LF output. Invalid UTF-8 is replaced lossily, per line,
/// so a bad byte never poisons the rest of the stream.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the lines the chunk completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(take_line(&mut self.partial));
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Flush the unterminated tail at end of stream, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(take_line(&mut self.partial))
        }
    }
}

/// Split a fully-buffered output capture into lines in one pass.
pub(crate) fn split_lines(bytes: &[u8]) -> Vec<String> {
    let mut buffer = LineBuffer::new();
    let mut lines = buffer.push(bytes);
    if let Some(tail) = buffer.finish() {
        lines.push(tail);
    }
    lines
}

fn take_line(partial: &mut Vec<u8>) -> String {
    if partial.last() == Some(&b'\r') {
        partial.pop();
    }
    let line = String::from_utf8_lossy(partial).into_owned();
    partial.clear();
    line
}
