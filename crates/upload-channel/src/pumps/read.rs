//! Inbound pump: decodes server messages and feeds the handler table.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use pkgdeploy_protocol::ServerMessage;

use crate::handlers::HandlerTable;
use crate::ws_client::DisconnectCallback;

/// Reads frames until the socket closes, errors, goes silent for
/// `read_deadline`, or `cancel` fires. Any inbound frame resets the
/// deadline. `on_disconnect` runs exactly once on the way out.
pub(crate) async fn read_pump<S>(
    mut read: S,
    handlers: Arc<HandlerTable>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    read_deadline: Duration,
    on_disconnect: DisconnectCallback,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(read_deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("no frames within {read_deadline:?}, connection considered dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + read_deadline);

                        match msg {
                            tungstenite::Message::Text(text) => handle_text(&text, &handlers),
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => trace!("received pong"),
                            tungstenite::Message::Close(frame) => {
                                debug!(?frame, "received close frame");
                                break;
                            }
                            _ => trace!("ignoring binary frame from server"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    on_disconnect();
}

fn handle_text(text: &str, handlers: &HandlerTable) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse server message: {e}");
            return;
        }
    };
    trace!(kind = ?msg.kind(), "received message");
    handlers.dispatch(msg);
}
