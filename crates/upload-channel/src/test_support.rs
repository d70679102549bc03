//! In-process WebSocket server for channel and upload tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use pkgdeploy_protocol::ServerMessage;

use crate::channel::DuplexUploadChannel;
use crate::token::TokenManager;
use crate::token::tests::fresh_jwt;
use crate::types::ChannelConfig;

pub(crate) type ServerSocket = WebSocketStream<TcpStream>;

pub(crate) struct TestServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    last_token: Arc<Mutex<Option<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Accepts connections until stopped. `handler` gets the 1-based
    /// connection number and the upgraded socket.
    pub(crate) async fn spawn<F, Fut>(handler: F) -> Self
    where
        F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let last_token = Arc::new(Mutex::new(None));
        let handler = Arc::new(handler);

        let task = {
            let accepted = Arc::clone(&accepted);
            let last_token = Arc::clone(&last_token);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let accepted = Arc::clone(&accepted);
                    let last_token = Arc::clone(&last_token);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        let capture =
                            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                *last_token.lock().unwrap() = token_from_query(req.uri().query());
                                Ok(resp)
                            };
                        let accepted_ws =
                            tokio_tungstenite::accept_hdr_async(stream, capture).await;
                        let Ok(ws) = accepted_ws else {
                            return;
                        };
                        let n = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                        handler(n, ws).await;
                    });
                }
            })
        };

        Self {
            addr,
            accepted,
            last_token,
            task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://{}/ws/upload", self.addr)
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }

    /// Stops accepting; established sockets stay up.
    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned())
}

/// Keeps the socket open until the client goes away.
pub(crate) async fn accept_and_hold(_n: usize, mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

/// Next text frame, or an empty string once the client is gone.
pub(crate) async fn recv_text(ws: &mut ServerSocket) -> String {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Close(_) => break,
            _ => {}
        }
    }
    String::new()
}

/// Next binary frame, or empty bytes once the client is gone.
pub(crate) async fn recv_binary(ws: &mut ServerSocket) -> Bytes {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Binary(data) => return data,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Bytes::new()
}

pub(crate) async fn send_msg(ws: &mut ServerSocket, msg: &ServerMessage) {
    let json = serde_json::to_string(msg).unwrap();
    let _ = ws.send(Message::Text(json.into())).await;
}

/// Channel with a short backoff so reconnect tests stay fast.
pub(crate) fn test_channel(url: &str) -> DuplexUploadChannel {
    let mut config = ChannelConfig::new(url);
    config.reconnect_base_delay = Duration::from_millis(20);
    config.handshake_timeout = Duration::from_secs(5);
    test_channel_with(config, TokenManager::new(fresh_jwt(), None))
}

pub(crate) fn test_channel_with(
    config: ChannelConfig,
    tokens: TokenManager,
) -> DuplexUploadChannel {
    DuplexUploadChannel::new(config, Arc::new(tokens))
}
