//! Upload WebSocket server.
//!
//! Listens on a TCP port and upgrades every request to a WebSocket.
//! The bearer token travels in the `token` query parameter; rejected
//! clients get `{type:"error",message:"Unauthorized"}` and are closed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_util::sync::CancellationToken;

use pkgdeploy_protocol::ServerMessage;
use pkgdeploy_protocol::constants::{TOKEN_QUERY_PARAM, WS_MAX_MESSAGE_SIZE};

use crate::ServerError;
use crate::connection::{Sender, write_pump};
use crate::handler::{Authorizer, PackageHandler};
use crate::session::UploadSession;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([127, 0, 0, 1], 0).into(),
        }
    }
}

/// The upload server. Each connection runs its own upload session.
pub struct UploadServer<A: Authorizer, H: PackageHandler> {
    bind: SocketAddr,
    authorizer: Arc<A>,
    handler: Arc<H>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<A: Authorizer, H: PackageHandler> UploadServer<A, H> {
    pub fn new(config: ServerConfig, authorizer: A, handler: H) -> Arc<Self> {
        Arc::new(Self {
            bind: config.bind,
            authorizer: Arc::new(authorizer),
            handler: Arc::new(handler),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound address once [`run`](Self::run) is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Binds the listener. Split from [`serve`](Self::serve) so callers
    /// know the address before accepting.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");
        Ok(listener)
    }

    /// Binds and serves until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accepts connections on `listener` until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("upload server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::error!("accept error: {e}"),
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut token = None;
        let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            token = token_from_query(req.uri().query());
            Ok(resp)
        };

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_hdr_async_with_config(stream, capture, Some(ws_config)).await?;
        let (ws_sink, frames) = ws_stream.split();

        let cancel = self.cancel.child_token();
        let (sender, rx) = Sender::channel();
        let writer = tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

        let authorized = token
            .as_deref()
            .is_some_and(|t| self.authorizer.authorize(t));
        if !authorized {
            tracing::warn!(%peer_addr, "rejecting upload connection: unauthorized");
            let _ = sender.send_msg(&ServerMessage::unauthorized());
            let _ = sender.send_raw(WsMessage::Close(None));
            drop(sender);
            let _ = writer.await;
            return Err(ServerError::Unauthorized);
        }

        tracing::info!(%peer_addr, "upload connection established");
        UploadSession::run(Arc::clone(&self.handler), sender, frames, cancel.clone()).await;
        cancel.cancel();
        let _ = writer.await;
        tracing::info!(%peer_addr, "upload connection closed");
        Ok(())
    }
}

fn token_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == TOKEN_QUERY_PARAM)
            .then(|| percent_decode_str(value).decode_utf8_lossy().into_owned())
    })
}
