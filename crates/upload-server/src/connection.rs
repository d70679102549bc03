//! Per-client socket plumbing: send buffer and write pump.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use pkgdeploy_protocol::ServerMessage;
use pkgdeploy_protocol::constants::WS_PING_PERIOD;

use crate::SEND_BUFFER_SIZE;

/// Handle for sending frames to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        (Self { tx }, rx)
    }

    /// Queues a server message as JSON text.
    pub fn send_msg(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let json = serde_json::to_string(msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    pub(crate) fn send_raw(&self, msg: WsMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|_| SendError)
    }

    /// Returns `true` if the write pump is still running.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send buffer is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Drains the send buffer and pings the client periodically. Sends a
/// close frame on the way out.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<WsMessage>,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(ws_msg) = msg else { break };
                let closing = matches!(ws_msg, WsMessage::Close(_));
                if let Err(e) = sink.send(ws_msg).await {
                    tracing::debug!("write pump send error: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::debug!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Flush whatever was queued before the cancel, e.g. a final error.
    while let Ok(msg) = rx.try_recv() {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
