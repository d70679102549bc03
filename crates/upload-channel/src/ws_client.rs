//! One WebSocket connection to the upload endpoint.
//!
//! Owns the read, write and ping pumps. Outbound frames go through a
//! bounded queue drained by the write pump; inbound frames are decoded and
//! dispatched to the shared [`HandlerTable`].

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::handlers::HandlerTable;
use crate::types::ChannelConfig;

/// Invoked once when the read pump exits.
pub(crate) type DisconnectCallback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WsConnection {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    ping_handle: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Opens `url` and starts the pumps.
    pub(crate) async fn connect(
        url: &str,
        config: &ChannelConfig,
        handlers: Arc<HandlerTable>,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self, ChannelError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false)
                .await
                .map_err(ChannelError::from_connect)?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(64);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            handlers,
            write_tx.clone(),
            config.read_deadline,
            on_disconnect,
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            config.ping_period,
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            cancel,
            read_handle,
            _write_handle: write_handle,
            ping_handle,
        })
    }

    /// Handle to the outbound queue.
    pub(crate) fn writer(&self) -> mpsc::Sender<tungstenite::Message> {
        self.write_tx.clone()
    }

    /// Queues a frame without waiting.
    pub(crate) fn try_send(&self, msg: tungstenite::Message) -> Result<(), ChannelError> {
        self.write_tx.try_send(msg).map_err(|_| ChannelError::Closed)
    }

    /// Sends a close frame and lets the pumps wind down.
    pub(crate) fn close(&self) {
        let _ = self.write_tx.try_send(tungstenite::Message::Close(None));
        self.cancel.cancel();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.ping_handle.abort();
        // The write pump is left to send its close frame on cancel.
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
