//! Upload handshake state machine for one client connection.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pkgdeploy_protocol::{
    ClientMessage, ClientText, ErrorCode, ServerMessage, UploadMetadata, parse_client_text,
};

use crate::connection::Sender;
use crate::handler::{Fault, PackageHandler, ProgressReporter};

/// Where a connection is in the upload handshake.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionPhase {
    AwaitingMetadata,
    AwaitingPayload(UploadMetadata),
    Processing { name: String },
    /// Previous upload finished; a new metadata frame starts the next one.
    Done,
}

/// Outcome of a processing task, fed back into the read loop.
struct Finished {
    name: String,
    outcome: Result<Option<serde_json::Value>, Fault>,
}

pub(crate) struct UploadSession<H: PackageHandler> {
    handler: Arc<H>,
    sender: Sender,
    phase: SessionPhase,
    processing: Option<CancellationToken>,
    done_tx: mpsc::Sender<Finished>,
}

impl<H: PackageHandler> UploadSession<H> {
    /// Runs the session until the client goes away or `cancel` fires.
    pub(crate) async fn run<S>(
        handler: Arc<H>,
        sender: Sender,
        mut frames: S,
        cancel: CancellationToken,
    ) where
        S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let mut session = Self {
            handler,
            sender,
            phase: SessionPhase::AwaitingMetadata,
            processing: None,
            done_tx,
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(finished) = done_rx.recv() => session.on_finished(finished),

                frame = frames.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => session.on_text(&text),
                        Some(Ok(WsMessage::Binary(data))) => session.on_binary(data),
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = session.sender.send_raw(WsMessage::Pong(data));
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("read error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        // Client gone: stop any processing still running.
        if let Some(token) = session.processing.take() {
            token.cancel();
        }
    }

    fn on_text(&mut self, text: &str) {
        match parse_client_text(text) {
            Ok(ClientText::Metadata(metadata)) => self.on_metadata(metadata),
            Ok(ClientText::Control(ClientMessage::Cancel)) => self.on_cancel(),
            Err(e) => warn!("ignoring unparseable client frame: {e}"),
        }
    }

    fn on_metadata(&mut self, metadata: UploadMetadata) {
        if !matches!(self.phase, SessionPhase::AwaitingMetadata | SessionPhase::Done) {
            warn!(phase = ?self.phase, "metadata received mid-upload");
            self.reply_fault(Fault::message("an upload is already in progress"));
            return;
        }
        if let Err(e) = metadata.validate() {
            info!(name = %metadata.name, error = %e, "rejecting upload metadata");
            self.reply_fault(Fault::code(ErrorCode::InvalidPackage));
            return;
        }
        if let Err(fault) = self.handler.check_metadata(&metadata) {
            info!(name = %metadata.name, %fault, "handler rejected upload metadata");
            self.reply_fault(fault);
            return;
        }

        info!(name = %metadata.name, size = metadata.size, "upload accepted, awaiting payload");
        let _ = self.sender.send_msg(&ServerMessage::Ready);
        self.phase = SessionPhase::AwaitingPayload(metadata);
    }

    fn on_binary(&mut self, payload: Bytes) {
        let metadata = match std::mem::replace(&mut self.phase, SessionPhase::AwaitingMetadata) {
            SessionPhase::AwaitingPayload(metadata) => metadata,
            other => {
                warn!(phase = ?other, "unexpected binary frame");
                self.phase = other;
                return;
            }
        };

        if payload.len() as u64 != metadata.size {
            warn!(
                expected = metadata.size,
                received = payload.len(),
                "payload size does not match metadata"
            );
            self.reply_fault(Fault::code(ErrorCode::InvalidPackage));
            return;
        }

        let token = CancellationToken::new();
        self.processing = Some(token.clone());
        self.phase = SessionPhase::Processing {
            name: metadata.name.clone(),
        };
        self.spawn_processing(metadata, payload, token);
    }

    fn spawn_processing(&self, metadata: UploadMetadata, payload: Bytes, token: CancellationToken) {
        let handler = Arc::clone(&self.handler);
        let reporter = ProgressReporter::new(self.sender.clone());
        let done_tx = self.done_tx.clone();
        let name = metadata.name.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Fault::code(ErrorCode::OperationCancelled)),
                res = handler.store(metadata, payload, reporter, token.clone()) => {
                    if token.is_cancelled() {
                        Err(Fault::code(ErrorCode::OperationCancelled))
                    } else {
                        res
                    }
                }
            };
            let _ = done_tx.send(Finished { name, outcome }).await;
        });
    }

    fn on_cancel(&mut self) {
        match &self.phase {
            SessionPhase::Processing { name } => {
                info!(%name, "client cancelled upload");
                if let Some(token) = &self.processing {
                    token.cancel();
                }
            }
            SessionPhase::AwaitingPayload(metadata) => {
                info!(name = %metadata.name, "client cancelled before sending payload");
                self.phase = SessionPhase::Done;
                self.reply_fault(Fault::code(ErrorCode::OperationCancelled));
            }
            SessionPhase::AwaitingMetadata | SessionPhase::Done => {
                debug!("cancel with no upload in progress");
            }
        }
    }

    fn on_finished(&mut self, finished: Finished) {
        self.processing = None;
        self.phase = SessionPhase::Done;
        match finished.outcome {
            Ok(data) => {
                info!(name = %finished.name, "upload completed");
                let _ = self.sender.send_msg(&ServerMessage::Completed { data });
            }
            Err(fault) => {
                info!(name = %finished.name, %fault, "upload failed");
                self.reply_fault(fault);
            }
        }
    }

    fn reply_fault(&self, fault: Fault) {
        let _ = self.sender.send_msg(&fault.to_message());
    }
}
