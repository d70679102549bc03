//! Install / uninstall client.
//!
//! Each call is a `POST` whose response body is a `text/event-stream`
//! carrying progress records until one terminal record. The body is read
//! chunk by chunk so every progress record reaches the caller as soon as
//! it arrives.

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::{debug, info};

use pkgdeploy_progress::{
    OperationError, OperationSlot, OperationTransport, PendingOperation, ProgressCallback,
    ProgressSink, TransportFuture, spawn_operation,
};
use pkgdeploy_upload_channel::TokenManager;

use crate::config::OperationClientConfig;
use crate::stream::consume_event_stream;

const EVENT_STREAM: &str = "text/event-stream";

/// Characters escaped in a package id path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Streamed operations the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Uninstall,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

/// Builds `{base}/api/packages/{id}/{kind}`.
pub fn endpoint_url(base_url: &str, package_id: &str, kind: OperationKind) -> String {
    let base = base_url.trim_end_matches('/');
    let id = utf8_percent_encode(package_id, PATH_SEGMENT);
    format!("{base}/api/packages/{id}/{}", kind.as_str())
}

#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub package_id: String,
}

struct StreamTransport {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl StreamTransport {
    async fn run(
        &self,
        request: OperationRequest,
        sink: &mut ProgressSink,
    ) -> Result<serde_json::Value, OperationError> {
        let token = self
            .tokens
            .valid_token()
            .await
            .map_err(|e| OperationError::Auth(e.to_string()))?;

        let url = endpoint_url(&self.base_url, &request.package_id, request.kind);
        info!(
            kind = request.kind.as_str(),
            package = %request.package_id,
            "starting streamed operation"
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await
            .map_err(|e| OperationError::Connection(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), %body, "operation rejected");
            return Err(status_error(status, body));
        }

        consume_event_stream(resp.bytes_stream(), sink).await
    }
}

fn status_error(status: StatusCode, body: String) -> OperationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            OperationError::Auth(format!("server answered {}", status.as_u16()))
        }
        _ => {
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                body
            };
            OperationError::Remote {
                code: None,
                message,
            }
        }
    }
}

impl OperationTransport for StreamTransport {
    type Request = OperationRequest;

    fn execute<'a>(
        &'a self,
        request: Self::Request,
        sink: &'a mut ProgressSink,
    ) -> TransportFuture<'a> {
        Box::pin(self.run(request, sink))
    }
}

/// Client for the streamed install / uninstall endpoints.
///
/// Owns one operation slot: a second call while an operation is active
/// fails with [`OperationError::Busy`].
pub struct StreamedOperationClient {
    transport: Arc<StreamTransport>,
    slot: OperationSlot,
}

impl StreamedOperationClient {
    pub fn new(
        config: OperationClientConfig,
        tokens: Arc<TokenManager>,
    ) -> Result<Self, OperationError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| OperationError::Connection(e.to_string()))?;

        Ok(Self {
            transport: Arc::new(StreamTransport {
                http,
                base_url: config.base_url,
                tokens,
            }),
            slot: OperationSlot::new("install/uninstall operation"),
        })
    }

    pub fn install(
        &self,
        package_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, OperationError> {
        self.start(OperationKind::Install, package_id, on_progress)
    }

    pub fn uninstall(
        &self,
        package_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, OperationError> {
        self.start(OperationKind::Uninstall, package_id, on_progress)
    }

    /// Starts `kind` for `package_id`. Progress events reach `on_progress`
    /// in arrival order; the returned operation resolves with the terminal
    /// payload.
    pub fn start(
        &self,
        kind: OperationKind,
        package_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, OperationError> {
        spawn_operation(
            Arc::clone(&self.transport),
            &self.slot,
            OperationRequest {
                kind,
                package_id: package_id.to_string(),
            },
            on_progress,
        )
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }
}

impl std::fmt::Debug for StreamedOperationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedOperationClient")
            .field("base_url", &self.transport.base_url)
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use pkgdeploy_progress::ProgressEvent;
    use pkgdeploy_protocol::ErrorCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    use super::*;

    fn token() -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"exp":4102444800}"#);
        format!("{header}.{claims}.sig")
    }

    fn client(base_url: &str) -> StreamedOperationClient {
        StreamedOperationClient::new(
            OperationClientConfig::new(base_url),
            Arc::new(TokenManager::new(token(), None)),
        )
        .unwrap()
    }

    struct Mock {
        url: String,
        request: oneshot::Receiver<String>,
        closed: oneshot::Receiver<()>,
        task: tokio::task::JoinHandle<()>,
    }

    /// Serves one request: writes the status line and each chunk in turn.
    /// With `hold`, keeps the socket open until the client hangs up.
    async fn mock(status: &str, chunks: &[&str], hold: bool) -> Mock {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let status = status.to_string();
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        let (request_tx, request) = oneshot::channel();
        let (closed_tx, closed) = oneshot::channel();

        let task = tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&head).into_owned());

            let resp_head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(resp_head.as_bytes()).await;
            for chunk in chunks {
                let _ = stream.write_all(chunk.as_bytes()).await;
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            if hold {
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = closed_tx.send(());
            } else {
                let _ = stream.shutdown().await;
            }
        });

        Mock {
            url,
            request,
            closed,
            task,
        }
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<(f64, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |ev: &ProgressEvent| {
            s.lock()
                .unwrap()
                .push((ev.percent_or_zero(), ev.message_or_empty().to_string()));
        });
        (cb, seen)
    }

    #[test]
    fn endpoint_escapes_package_id() {
        assert_eq!(
            endpoint_url("http://h:8080/", "org.mozilla.firefox", OperationKind::Install),
            "http://h:8080/api/packages/org.mozilla.firefox/install"
        );
        assert_eq!(
            endpoint_url("http://h", "a b/c", OperationKind::Uninstall),
            "http://h/api/packages/a%20b%2Fc/uninstall"
        );
    }

    #[test]
    fn auth_statuses_map_to_auth() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            OperationError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "nope".into()),
            OperationError::Auth(_)
        ));
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "  ".into()).to_string(),
            "Bad Gateway"
        );
    }

    #[tokio::test]
    async fn install_streams_progress_and_resolves() {
        let mock = mock(
            "200 OK",
            &[
                "data: {\"percent\":0}\n",
                "data: {\"percent\":50,\"message\":\"copying\"}\n",
                ":keepalive\n",
                "data: {\"status\":\"completed\",\"data\":{\"id\":\"x\"}}\n",
            ],
            false,
        )
        .await;

        let client = client(&mock.url);
        let (cb, seen) = recorder();
        let value = client.install("firefox", cb).unwrap().wait().await.unwrap();

        assert_eq!(value, serde_json::json!({"id": "x"}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0.0, String::new()), (50.0, "copying".to_string())]
        );
        assert!(!client.is_busy());

        let head = mock.request.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("post /api/packages/firefox/install "));
        assert!(head.contains(&format!("authorization: bearer {}", token().to_ascii_lowercase())));
        assert!(head.contains("accept: text/event-stream"));
    }

    #[tokio::test]
    async fn uninstall_rejects_with_remote_error() {
        let mock = mock(
            "200 OK",
            &["data: {\"status\":\"error\",\"message\":\"PROCESS_RUNNING\"}\n"],
            false,
        )
        .await;

        let (cb, _) = recorder();
        let err = client(&mock.url)
            .uninstall("firefox", cb)
            .unwrap()
            .wait()
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::ProcessRunning));
        assert_eq!(err.to_string(), ErrorCode::ProcessRunning.user_message());
        let head = mock.request.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("post /api/packages/firefox/uninstall "));
    }

    #[tokio::test]
    async fn unauthorized_status_is_auth_error() {
        let mock = mock("401 Unauthorized", &["{\"error\":\"expired\"}"], false).await;
        let (cb, _) = recorder();
        let err = client(&mock.url)
            .install("firefox", cb)
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Auth(_)));
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let mock = mock("500 Internal Server Error", &["disk full"], false).await;
        let (cb, _) = recorder();
        let err = client(&mock.url)
            .install("firefox", cb)
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OperationError::Remote {
                code: None,
                message: "disk full".into()
            }
        );
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        let mock = mock("200 OK", &[], false).await;
        let url = mock.url.clone();
        mock.task.abort();
        let _ = mock.task.await;

        let (cb, _) = recorder();
        let err = client(&url)
            .install("firefox", cb)
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Connection(_)));
    }

    #[tokio::test]
    async fn busy_while_active_and_cancel_releases_body() {
        let mock = mock("200 OK", &["data: {\"percent\":1}\n"], true).await;
        let client = client(&mock.url);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cb: ProgressCallback = Arc::new(move |ev: &ProgressEvent| {
            let _ = tx.send(ev.percent_or_zero());
        });
        let first = client.install("firefox", Arc::clone(&cb)).unwrap();
        assert_eq!(rx.recv().await, Some(1.0));

        let second = client.uninstall("firefox", cb);
        assert!(matches!(second, Err(OperationError::Busy(_))));
        assert!(!first.handle().is_terminal());

        first.cancel();
        first.cancel();
        assert!(first.wait().await.unwrap_err().is_cancelled());
        assert!(!client.is_busy());

        tokio::time::timeout(Duration::from_secs(5), mock.closed)
            .await
            .expect("response body should be dropped on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_before_request_sends_nothing() {
        let mock = mock("200 OK", &[], false).await;
        let (cb, seen) = recorder();

        let op = client(&mock.url).install("firefox", cb).unwrap();
        op.cancel();
        assert!(op.wait().await.unwrap_err().is_cancelled());

        assert!(
            tokio::time::timeout(Duration::from_millis(200), mock.request)
                .await
                .is_err()
        );
        assert!(seen.lock().unwrap().is_empty());
    }
}
