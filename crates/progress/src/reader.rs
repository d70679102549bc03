use pkgdeploy_protocol::constants::{COMMENT_PREFIX, DATA_PREFIX};

use crate::decoder::BufferedLineDecoder;

/// Turns a chunked `text/event-stream` body into ordered raw payloads.
///
/// Keepalive comments and blank lines never leave the reader. A reader
/// serves exactly one decode session: [`finish`](Self::finish) consumes it.
#[derive(Debug, Default)]
pub struct EventStreamReader {
    lines: BufferedLineDecoder,
}

impl EventStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the payloads of every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.lines
            .feed(chunk)
            .into_iter()
            .filter_map(|line| extract_payload(&line))
            .collect()
    }

    /// Ends the session, returning the payload of a trailing unterminated
    /// line if there is one.
    pub fn finish(self) -> Option<String> {
        self.lines.finish().and_then(|line| extract_payload(&line))
    }
}

/// Classifies one line: `None` for transport noise, otherwise the payload
/// with any `data:` marker (and one following space) removed.
fn extract_payload(line: &str) -> Option<String> {
    if line.trim().is_empty() || line.starts_with(COMMENT_PREFIX) {
        return None;
    }
    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    };
    if payload.trim().is_empty() {
        return None;
    }
    Some(payload.to_string())
}
