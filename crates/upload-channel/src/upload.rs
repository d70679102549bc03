//! The binary-upload handshake as an [`OperationTransport`].
//!
//! Sequence: metadata text frame, `ready`, one binary frame carrying the
//! whole package, zero or more `progress`, then exactly one `completed` or
//! `error`. The server validates the metadata before any payload byte moves.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pkgdeploy_progress::{
    Disposition, OperationError, OperationTransport, ProgressSink, TransportFuture,
};
use pkgdeploy_protocol::{
    ClientMessage, MessageKind, ServerMessage, UploadMetadata, describe_remote_error,
};

use crate::channel::DuplexUploadChannel;
use crate::handlers::{Handler, HandlerTable};

/// One upload: validated metadata plus the package bytes.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub metadata: UploadMetadata,
    pub payload: Bytes,
}

/// Routes every dispatchable message kind into one queue for the duration
/// of an upload. Handlers registered before the upload are put back on drop.
struct UploadHandlers {
    table: Arc<HandlerTable>,
    installed: Vec<(MessageKind, Handler, Option<Handler>)>,
}

impl UploadHandlers {
    fn install(table: &Arc<HandlerTable>) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let installed = MessageKind::ALL
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                let handler: Handler = Arc::new(move |msg: ServerMessage| {
                    let _ = tx.send(msg);
                });
                let previous = table.swap(kind, Arc::clone(&handler));
                (kind, handler, previous)
            })
            .collect();
        (
            Self {
                table: Arc::clone(table),
                installed,
            },
            rx,
        )
    }
}

impl Drop for UploadHandlers {
    fn drop(&mut self) {
        for (kind, handler, previous) in self.installed.drain(..) {
            self.table.restore(kind, &handler, previous);
        }
    }
}

pub(crate) struct UploadTransport {
    channel: DuplexUploadChannel,
}

impl UploadTransport {
    pub(crate) fn new(channel: DuplexUploadChannel) -> Self {
        Self { channel }
    }

    async fn run(
        &self,
        request: UploadRequest,
        sink: &mut ProgressSink,
    ) -> Result<serde_json::Value, OperationError> {
        let UploadRequest { metadata, payload } = request;
        metadata.validate()?;
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| OperationError::Decode(e.to_string()))?;

        let (_handlers, mut inbound) = UploadHandlers::install(self.channel.handlers());
        self.channel.connect().await?;

        let mut state_rx = self.channel.subscribe_state();
        state_rx.borrow_and_update();

        info!(name = %metadata.name, size = metadata.size, "sending upload metadata");
        self.channel.send_text(metadata_json.clone()).await?;

        let handshake_timeout = self.channel.config().handshake_timeout;
        let ready_deadline = tokio::time::sleep(handshake_timeout);
        tokio::pin!(ready_deadline);

        let mut payload_sent = false;
        let mut reauthenticated = false;

        loop {
            tokio::select! {
                // Frames dispatched before a close are handled before the
                // state change that close causes.
                biased;

                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        return Err(OperationError::Connection("upload channel dropped".into()));
                    };

                    if msg.is_unauthorized() {
                        if payload_sent || reauthenticated {
                            return Err(OperationError::Auth(
                                "server rejected the access token".into(),
                            ));
                        }
                        warn!("server rejected the access token, refreshing and retrying");
                        reauthenticated = true;
                        self.channel.reauthenticate().await?;
                        state_rx.borrow_and_update();
                        self.channel.send_text(metadata_json.clone()).await?;
                        ready_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + handshake_timeout);
                        continue;
                    }

                    match sink.accept(msg.to_record()) {
                        Disposition::Ready if !payload_sent => {
                            debug!(bytes = payload.len(), "server ready, sending payload");
                            self.channel.send_binary(payload.clone()).await?;
                            payload_sent = true;
                        }
                        Disposition::Ready => debug!("duplicate ready ignored"),
                        Disposition::Finished(Err(OperationError::Remote { code, message }))
                            if !payload_sent =>
                        {
                            return Err(OperationError::Handshake(describe_remote_error(
                                code, &message,
                            )));
                        }
                        Disposition::Finished(result) => return result,
                        Disposition::Continue | Disposition::Ignored => {}
                    }
                }

                () = &mut ready_deadline, if !payload_sent => {
                    return Err(OperationError::Handshake(format!(
                        "server did not acknowledge the metadata within {handshake_timeout:?}"
                    )));
                }

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(OperationError::Connection("upload channel dropped".into()));
                    }
                    let state = *state_rx.borrow_and_update();
                    if !state.is_open() {
                        // The server-side session died with the socket; a
                        // reconnect cannot resume it.
                        warn!(?state, payload_sent, "connection lost during upload");
                        return Err(OperationError::Connection(
                            "connection lost during upload".into(),
                        ));
                    }
                }
            }
        }
    }
}

impl OperationTransport for UploadTransport {
    type Request = UploadRequest;

    fn execute<'a>(
        &'a self,
        request: Self::Request,
        sink: &'a mut ProgressSink,
    ) -> TransportFuture<'a> {
        Box::pin(self.run(request, sink))
    }

    fn on_cancel(&self) {
        match self.channel.try_send_control(&ClientMessage::Cancel) {
            Ok(()) => info!("cancel sent to server"),
            Err(e) => debug!(error = %e, "could not notify server of cancel"),
        }
    }
}
