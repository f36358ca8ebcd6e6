use crate::errors::TransportError;

/// Default cap on a single unterminated line.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental newline splitter for an SSE body.
///
/// Bytes are buffered until a `\n` arrives, so a line (or a UTF-8 sequence)
/// split across network chunks is reassembled before it is decoded.
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
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Appends a chunk and returns every line it completed, without terminators.
    ///
    /// Fails once the pending unterminated line grows past the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, TransportError> {
        let scan_from = self.buf.len();
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        for idx in scan_from..self.buf.len() {
            if self.buf[idx] == b'\n' {
                lines.push(decode_line(&self.buf[start..idx]));
                start = idx + 1;
            }
        }
        self.buf.drain(..start);
        if self.buf.len() > self.max_line {
            let pending = self.buf.len();
            self.buf.clear();
            return Err(TransportError::Other(format!(
                "stream line exceeds {} bytes ({pending} buffered)",
                self.max_line
            )));
        }
        Ok(lines)
    }

    /// Returns the unterminated remainder once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let line = decode_line(&rest);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Returns the payload of a `data:` line.
///
/// Blank lines, `:` comments, other SSE fields and the `[DONE]` sentinel yield `None`.
pub fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_line_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"data: {\"content\":\"hel").expect("push").is_empty());
        assert!(decoder.buffered() > 0);
        let lines = decoder
            .push(b"lo\"}\r\ndata: {\"content\":\"!\"}\n\n")
            .expect("push");
        assert_eq!(
            lines,
            vec![
                "data: {\"content\":\"hello\"}".to_string(),
                "data: {\"content\":\"!\"}".to_string(),
                String::new(),
            ]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn multibyte_characters_survive_any_split_point() {
        let body = "data: {\"content\":\"héllo ✓\"}\n".as_bytes();
        for split in 0..body.len() {
            let mut decoder = LineDecoder::default();
            let mut lines = decoder.push(&body[..split]).expect("push");
            lines.extend(decoder.push(&body[split..]).expect("push"));
            assert_eq!(lines, vec!["data: {\"content\":\"héllo ✓\"}".to_string()]);
        }
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut decoder = LineDecoder::default();
        assert!(
            decoder
                .push(b"data: {\"conversation_id\":\"c\"}")
                .expect("push")
                .is_empty()
        );
        assert_eq!(
            decoder.finish().as_deref(),
            Some("data: {\"conversation_id\":\"c\"}")
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn oversized_unterminated_line_is_rejected() {
        let mut decoder = LineDecoder::with_limit(16);
        assert_eq!(
            decoder.push(b"data: short\n").expect("push"),
            vec!["data: short".to_string()]
        );
        assert!(decoder.push(b"data: 0123456789").expect("push").is_empty());
        let err = decoder.push(b"abcdef").expect_err("over the limit");
        assert!(matches!(err, TransportError::Other(_)));
        assert!(!err.is_retryable());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn long_lines_that_terminate_in_the_same_chunk_pass() {
        let mut decoder = LineDecoder::with_limit(8);
        let lines = decoder
            .push(b"data: a line well past eight bytes\n")
            .expect("push");
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn data_payload_skips_non_data_lines() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload(""), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("event: message"), None);
        assert_eq!(data_payload("data: [DONE]"), None);
    }
}
