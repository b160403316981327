//! The `data:`-line subset of server-sent events spoken by the upstream.
//!
//! Upstream frames carry a single `data:` field and are separated by blank
//! lines; `id:`, `event:`, `retry:` and comments are not used and are ignored.

use qingyan_types::{DONE_SENTINEL, RelayError, error::Result};

/// Longest line, in bytes, buffered while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits a byte stream into lines, tolerating chunk boundaries anywhere
/// (including inside a multi-byte UTF-8 sequence).
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    /// A decoder that rejects lines longer than `max_line` bytes.
    #[must_use]
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Feed one chunk and return every line it completes, without the
    /// `\n` / `\r\n` terminator.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Http`] when the unterminated remainder grows
    /// past the line limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=nl).collect();
            lines.push(decode(&raw));
        }
        if self.buf.len() > self.max_line {
            self.buf.clear();
            return Err(RelayError::Http(format!(
                "upstream line exceeds {} bytes",
                self.max_line
            )));
        }
        Ok(lines)
    }

    /// Flush a trailing line that was not terminated before end of body.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        Some(decode(&raw))
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Payload of a `data:` line with surrounding whitespace stripped.
///
/// Returns `None` for blank lines, non-`data:` lines and empty payloads.
#[must_use]
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:")
        .map(str::trim)
        .filter(|d| !d.is_empty())
}

/// Extract the payloads of an already-buffered SSE body, stopping at the
/// `[DONE]` sentinel (which is not included).
#[must_use]
pub fn data_payloads(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(data_payload)
        .take_while(|d| *d != DONE_SENTINEL)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut d = LineDecoder::default();
        assert!(d.push(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(
            d.push(b":1}\n\ndata: x\r\n").unwrap(),
            vec!["data: {\"a\":1}", "", "data: x"]
        );
        assert!(d.finish().is_none());
    }

    #[test]
    fn test_split_utf8_sequence() {
        let bytes = "data: 你好\n".as_bytes();
        let mut d = LineDecoder::default();
        assert!(d.push(&bytes[..8]).unwrap().is_empty());
        assert_eq!(d.push(&bytes[8..]).unwrap(), vec!["data: 你好"]);
    }

    #[test]
    fn test_unterminated_last_line() {
        let mut d = LineDecoder::default();
        assert!(d.push(b"data: [DONE]").unwrap().is_empty());
        assert_eq!(d.finish().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn test_overlong_line_rejected() {
        let mut d = LineDecoder::with_limit(8);
        // complete lines of any length pass
        assert_eq!(d.push(b"data: a long line\n").unwrap(), vec!["data: a long line"]);
        assert!(d.push(b"data:").unwrap().is_empty());
        let err = d.push(b" no newline yet").unwrap_err();
        assert!(matches!(err, RelayError::Http(_)), "{err:?}");
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"x\":1}  "), Some("{\"x\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("data:   "), None);
        assert_eq!(data_payload(""), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("event: message"), None);
        assert_eq!(data_payload(" data: indented"), None);
    }

    #[test]
    fn test_data_payloads_stop_at_done() {
        let raw = "data: a\n\nevent: x\ndata: b\n\ndata: [DONE]\n\ndata: late\n";
        assert_eq!(data_payloads(raw), vec!["a", "b"]);
    }
}
