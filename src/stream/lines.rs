//! Incremental newline splitting over arbitrarily chunked bytes

/// Splits a byte stream into lines as chunks arrive.
///
/// Bytes are buffered rather than decoded per chunk, so a multi-byte UTF-8
/// sequence or a line cut by a chunk boundary is only decoded once complete.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes (without terminators).
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.pending.is_empty() {
                lines.push(decode_line(head));
            } else {
                self.pending.extend_from_slice(head);
                lines.push(decode_line(&self.pending));
                self.pending.clear();
            }
            rest = &tail[1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// End of stream: an unterminated fragment is never a line. Returns how
    /// many bytes were dropped.
    pub(crate) fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
