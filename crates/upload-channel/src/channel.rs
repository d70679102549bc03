//! The duplex upload channel.
//!
//! Owns exactly one authenticated WebSocket connection, its
//! [`ConnectionState`], the inbound [`HandlerTable`] and the upload slot.
//! Instances are explicitly constructed and cheap to clone; clones share
//! the same connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use pkgdeploy_progress::{OperationSlot, PendingOperation, ProgressCallback, spawn_operation};
use pkgdeploy_protocol::constants::TOKEN_QUERY_PARAM;
use pkgdeploy_protocol::{ClientMessage, MessageKind, UploadMetadata};

use crate::error::ChannelError;
use crate::handlers::{Handler, HandlerTable};
use crate::token::TokenManager;
use crate::types::{ChannelConfig, ConnectionState};
use crate::upload::{UploadRequest, UploadTransport};
use crate::ws_client::WsConnection;

pub(crate) struct ChannelInner {
    pub(crate) config: ChannelConfig,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) handlers: Arc<HandlerTable>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) connection: Mutex<Option<WsConnection>>,
    /// Bumped for every new socket; disconnects from older sockets are stale.
    pub(crate) generation: AtomicU64,
    /// Set by [`DuplexUploadChannel::disconnect`]; suppresses reconnection.
    pub(crate) manual_disconnect: AtomicBool,
    /// Serializes connect, reauthenticate and each reconnect attempt.
    pub(crate) connect_lock: tokio::sync::Mutex<()>,
    pub(crate) upload_slot: OperationSlot,
}

impl ChannelInner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(previous = ?*current, ?state, "connection state changed");
            *current = state;
            true
        });
    }

    pub(crate) fn take_connection(&self) -> Option<WsConnection> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub(crate) fn replace_connection(&self, conn: WsConnection) -> Option<WsConnection> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(conn)
    }

    /// Runs `f` against the live connection, failing fast when not open.
    fn with_open<R>(
        &self,
        f: impl FnOnce(&WsConnection) -> Result<R, ChannelError>,
    ) -> Result<R, ChannelError> {
        if !self.state().is_open() {
            return Err(ChannelError::NotConnected);
        }
        let guard = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(ChannelError::NotConnected),
        }
    }
}

/// Builds `<url>?token=<jwt>`.
pub fn build_connect_url(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let encoded = utf8_percent_encode(token, NON_ALPHANUMERIC);
    format!("{base}{separator}{TOKEN_QUERY_PARAM}={encoded}")
}

/// Authenticated duplex channel used for package uploads.
#[derive(Clone)]
pub struct DuplexUploadChannel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl DuplexUploadChannel {
    pub fn new(config: ChannelConfig, tokens: Arc<TokenManager>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                tokens,
                handlers: Arc::new(HandlerTable::new()),
                state_tx,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                manual_disconnect: AtomicBool::new(false),
                connect_lock: tokio::sync::Mutex::new(()),
                upload_slot: OperationSlot::new("upload"),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Opens the connection. Does nothing if already open; waits for an
    /// in-progress reconnection to settle first. Failures are returned
    /// without retrying.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let _guard = loop {
            if let ConnectionState::Reconnecting { .. } = self.state() {
                let mut rx = self.subscribe_state();
                let _ = rx
                    .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
                    .await;
            }
            let guard = self.inner.connect_lock.lock().await;
            if !matches!(self.state(), ConnectionState::Reconnecting { .. }) {
                break guard;
            }
        };
        if self.state().is_open() {
            return Ok(());
        }

        self.inner.manual_disconnect.store(false, Ordering::Release);
        self.inner.set_state(ConnectionState::Connecting);
        match crate::reconnection::open_connection(&self.inner).await {
            Ok(()) => {
                info!(url = %self.inner.config.upload_url, "upload channel connected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "upload channel connection failed");
                self.inner.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Refreshes the token unconditionally and replaces the connection.
    /// Used when the server rejects the current token.
    pub async fn reauthenticate(&self) -> Result<(), ChannelError> {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.tokens.force_refresh().await?;

        self.inner.manual_disconnect.store(false, Ordering::Release);
        self.inner.set_state(ConnectionState::Connecting);
        match crate::reconnection::open_connection(&self.inner).await {
            Ok(()) => {
                info!("upload channel reconnected with a refreshed token");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "reconnect after token refresh failed");
                self.inner.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Closes the connection without reconnecting.
    pub fn disconnect(&self) {
        self.inner.manual_disconnect.store(true, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(conn) = self.inner.take_connection() {
            conn.close();
        }
        self.inner.set_state(ConnectionState::Closed);
        info!("upload channel disconnected");
    }

    /// Registers the handler for `kind`, replacing any previous one.
    ///
    /// While an upload runs it owns every kind; handlers registered before
    /// it are restored when it ends.
    pub fn on(&self, kind: MessageKind, handler: Handler) {
        self.inner.handlers.on(kind, handler);
    }

    pub fn off(&self, kind: MessageKind) {
        self.inner.handlers.off(kind);
    }

    pub(crate) fn handlers(&self) -> &Arc<HandlerTable> {
        &self.inner.handlers
    }

    /// Sends a text frame. Fails fast unless the channel is open.
    pub async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.send(tungstenite::Message::Text(text.into())).await
    }

    /// Sends a binary frame. Fails fast unless the channel is open.
    pub async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.send(tungstenite::Message::Binary(data)).await
    }

    async fn send(&self, msg: tungstenite::Message) -> Result<(), ChannelError> {
        let write_tx = self.inner.with_open(|conn| Ok(conn.writer()))?;
        write_tx.send(msg).await.map_err(|_| ChannelError::Closed)
    }

    /// Queues a control message without waiting.
    pub fn try_send_control(&self, msg: &ClientMessage) -> Result<(), ChannelError> {
        let json = serde_json::to_string(msg)?;
        self.inner
            .with_open(|conn| conn.try_send(tungstenite::Message::Text(json.into())))
    }

    /// Starts an upload in the channel's single upload slot.
    ///
    /// Fails with `Busy` if an upload is already in flight; that upload is
    /// not affected.
    pub fn upload(
        &self,
        metadata: UploadMetadata,
        payload: Bytes,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, pkgdeploy_progress::OperationError> {
        metadata.validate()?;
        let transport = Arc::new(UploadTransport::new(self.clone()));
        spawn_operation(
            transport,
            &self.inner.upload_slot,
            UploadRequest { metadata, payload },
            on_progress,
        )
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.upload_slot.is_busy()
    }
}

impl std::fmt::Debug for DuplexUploadChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexUploadChannel")
            .field("url", &self.inner.config.upload_url)
            .field("state", &self.state())
            .finish()
    }
}
