//! Incremental text decoding for chunked byte streams.

/// Streaming UTF-8 decoder.
///
/// Multi-byte characters split across chunk boundaries are held back until
/// the rest arrives. Invalid sequences decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `chunk` as possible, retaining an incomplete
    /// trailing sequence for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a dangling incomplete sequence as U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Number of bytes held back waiting for a character to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Splits decoded text into `\n`-terminated lines across chunk arrivals.
///
/// The trailing, possibly incomplete, segment stays in the line buffer
/// until the next [`feed`](Self::feed) or [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct BufferedLineDecoder {
    utf8: Utf8StreamDecoder,
    line_buffer: String,
}

impl BufferedLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completes, in order.
    /// A trailing `\r` is stripped from each line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.line_buffer.push_str(&text);

        let Some(last_newline) = self.line_buffer.rfind('\n') else {
            return Vec::new();
        };

        let remainder = self.line_buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.line_buffer, remainder);

        complete
            .split_terminator('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Flushes the remaining buffer as a final line, if non-empty.
    pub fn finish(mut self) -> Option<String> {
        let tail = self.utf8.finish();
        self.line_buffer.push_str(&tail);
        let line = self
            .line_buffer
            .strip_suffix('\r')
            .unwrap_or(&self.line_buffer)
            .to_string();
        if line.is_empty() { None } else { Some(line) }
    }

    /// Returns the retained partial line.
    pub fn buffered(&self) -> &str {
        &self.line_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_split_multibyte_character() {
        let text = "héllo ✓";
        let bytes = text.as_bytes();
        // Split inside the 3-byte check mark.
        let cut = bytes.len() - 1;

        let mut dec = Utf8StreamDecoder::new();
        let first = dec.decode(&bytes[..cut]);
        assert_eq!(first, "héllo ");
        assert_eq!(dec.pending_len(), 2);

        let second = dec.decode(&bytes[cut..]);
        assert_eq!(second, "✓");
        assert_eq!(dec.pending_len(), 0);
    }

    #[test]
    fn utf8_byte_at_a_time() {
        let text = "日本語 ok";
        let mut dec = Utf8StreamDecoder::new();
        let mut out = String::new();
        for b in text.as_bytes() {
            out.push_str(&dec.decode(std::slice::from_ref(b)));
        }
        out.push_str(&dec.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn utf8_invalid_sequence_replaced() {
        let mut dec = Utf8StreamDecoder::new();
        let out = dec.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn utf8_dangling_sequence_on_finish() {
        let mut dec = Utf8StreamDecoder::new();
        assert_eq!(dec.decode(&[0xE2, 0x9C]), "");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut dec = BufferedLineDecoder::new();
        assert!(dec.feed(b"data: {\"per").is_empty());
        assert_eq!(dec.buffered(), "data: {\"per");

        let lines = dec.feed(b"cent\":5}\nnext");
        assert_eq!(lines, vec!["data: {\"percent\":5}"]);
        assert_eq!(dec.buffered(), "next");

        assert_eq!(dec.finish(), Some("next".to_string()));
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut dec = BufferedLineDecoder::new();
        let lines = dec.feed(b"a\nb\r\n\nc\n");
        assert_eq!(lines, vec!["a", "b", "", "c"]);
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn finish_strips_carriage_return() {
        let mut dec = BufferedLineDecoder::new();
        dec.feed(b"tail\r");
        assert_eq!(dec.finish(), Some("tail".to_string()));
    }

    #[test]
    fn every_split_point_reconstructs_lines() {
        let text = "data: {\"message\":\"café\"}\n:keepalive\n\ndata: {\"percent\":100}\n";
        let expected: Vec<&str> = text.split_terminator('\n').collect();
        let bytes = text.as_bytes();

        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                let mut dec = BufferedLineDecoder::new();
                let mut lines = dec.feed(&bytes[..a]);
                lines.extend(dec.feed(&bytes[a..b]));
                lines.extend(dec.feed(&bytes[b..]));
                if let Some(last) = dec.finish() {
                    lines.push(last);
                }
                assert_eq!(lines, expected, "split at {a}/{b}");
            }
        }
    }
}
