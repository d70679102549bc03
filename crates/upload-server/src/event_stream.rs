//! `text/event-stream` encoder for install / uninstall progress.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};

use pkgdeploy_protocol::StreamRecord;

/// Formats event-stream frames.
pub struct EventStreamWriter;

impl EventStreamWriter {
    pub const KEEPALIVE: &'static [u8] = b":keepalive\n\n";

    /// `data: <json>\n\n`.
    pub fn record(record: &StreamRecord) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_string(record)?;
        Ok(Bytes::from(format!("data: {json}\n\n")))
    }

    pub fn keepalive() -> Bytes {
        Bytes::from_static(Self::KEEPALIVE)
    }
}

/// Encodes `records` as a response body, emitting a keepalive comment
/// whenever nothing was sent for `keepalive`. The body ends after the
/// first terminal record or when `records` ends.
pub fn event_stream_body<S>(records: S, keepalive: Duration) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = StreamRecord> + Send + 'static,
{
    let records = records.boxed();
    stream::unfold(Some(records), move |state| async move {
        let mut records = state?;
        match tokio::time::timeout(keepalive, records.next()).await {
            Err(_) => Some((EventStreamWriter::keepalive(), Some(records))),
            Ok(None) => None,
            Ok(Some(record)) => {
                let next = if record.is_terminal() {
                    None
                } else {
                    Some(records)
                };
                let frame = match EventStreamWriter::record(&record) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("dropping unencodable record: {e}");
                        EventStreamWriter::keepalive()
                    }
                };
                Some((frame, next))
            }
        }
    })
}
