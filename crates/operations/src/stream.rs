//! Drives a chunked response body through the reader and the sink.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use pkgdeploy_progress::{Disposition, EventStreamReader, OperationError, ProgressSink};

/// Reads `body` to its terminal record.
///
/// Malformed intermediate records are logged and skipped. If the body ends
/// without a terminal record and its last record was malformed (terminated
/// or not), the result is [`OperationError::Decode`]; anything else is a
/// connection failure. The body is owned here, so every exit path releases
/// it.
pub async fn consume_event_stream<S, E>(
    body: S,
    sink: &mut ProgressSink,
) -> Result<serde_json::Value, OperationError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut reader = EventStreamReader::new();
    // Most recent record that failed to parse, cleared by any good record.
    let mut last_malformed = None;

    while let Some(chunk) = body.next().await {
        let chunk = chunk
            .map_err(|e| OperationError::Connection(format!("event stream read failed: {e}")))?;
        debug!(bytes = chunk.len(), "event stream chunk");

        for payload in reader.feed(&chunk) {
            match sink.accept_str(&payload) {
                Ok(Disposition::Finished(result)) => return result,
                Ok(_) => last_malformed = None,
                Err(e) => {
                    warn!(error = %e, "skipping malformed event stream record");
                    last_malformed = Some(e);
                }
            }
        }
    }

    if let Some(tail) = reader.finish() {
        if let Disposition::Finished(result) = sink.accept_str(&tail)? {
            return result;
        }
        last_malformed = None;
    }
    if let Some(e) = last_malformed {
        return Err(e.into());
    }
    Err(OperationError::Connection("event stream ended before a terminal event".into()))
}
