//! Outbound pump: the only task that touches the socket sink.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Forwards queued frames to the socket until cancelled or the queue closes,
/// then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                let is_close = matches!(msg, tungstenite::Message::Close(_));
                trace!(len = msg.len(), "writing frame");
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write error: {e}");
                    return;
                }
                if is_close {
                    return;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
