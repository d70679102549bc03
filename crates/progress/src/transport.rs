//! Shared runner for the upload and event-stream transports.
//!
//! A transport only moves records; [`spawn_operation`] owns the slot, the
//! translator, terminal detection, late-event suppression and cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pkgdeploy_protocol::StreamRecord;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DecodeError, OperationError};
use crate::event::{EventKind, ProgressCallback, ProgressEvent};
use crate::handle::{OperationHandle, OperationSlot, OperationState, PendingOperation};
use crate::translator::ProgressTranslator;

/// Boxed future returned by [`OperationTransport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, OperationError>> + Send + 'a>>;

/// One way of carrying an operation to the remote host.
pub trait OperationTransport: Send + Sync + 'static {
    type Request: Send + 'static;

    /// Runs the operation, pushing every inbound record into `sink` until
    /// it reports [`Disposition::Finished`]. Dropping the future must
    /// release all transport resources.
    fn execute<'a>(
        &'a self,
        request: Self::Request,
        sink: &'a mut ProgressSink,
    ) -> TransportFuture<'a>;

    /// Best-effort notification to the remote side after a local cancel.
    fn on_cancel(&self) {}
}

/// What a transport should do after handing a record to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Progress delivered; keep reading.
    Continue,
    /// Record arrived after the operation ended and was dropped.
    Ignored,
    /// The server is ready for the payload.
    Ready,
    /// Terminal record; return this outcome.
    Finished(Result<serde_json::Value, OperationError>),
}

/// Receives records from a transport and forwards progress to the caller.
pub struct ProgressSink {
    translator: ProgressTranslator,
    callback: ProgressCallback,
    state: Arc<OperationState>,
}

impl ProgressSink {
    pub fn new(callback: ProgressCallback) -> Self {
        Self::with_state(callback, Arc::new(OperationState::default()))
    }

    pub(crate) fn with_state(callback: ProgressCallback, state: Arc<OperationState>) -> Self {
        Self {
            translator: ProgressTranslator::new(),
            callback,
            state,
        }
    }

    /// `true` once a terminal record was accepted or the operation was cancelled.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Accepts a typed record.
    pub fn accept(&mut self, record: StreamRecord) -> Disposition {
        if self.state.is_terminal() {
            debug!("dropping record after terminal state");
            return Disposition::Ignored;
        }

        let event = self.translator.translate(record);
        match event.kind {
            EventKind::Progress => self.deliver(&event),
            EventKind::Ready => Disposition::Ready,
            EventKind::Completed => self.finish(Ok(event
                .payload
                .unwrap_or(serde_json::Value::Bool(true)))),
            EventKind::Error => self.finish(Err(OperationError::Remote {
                code: event.code,
                message: event.message.unwrap_or_default(),
            })),
        }
    }

    /// Parses and accepts a raw payload. A malformed payload leaves the
    /// operation state untouched.
    pub fn accept_str(&mut self, raw: &str) -> Result<Disposition, DecodeError> {
        if self.state.is_terminal() {
            return Ok(Disposition::Ignored);
        }
        let record: StreamRecord =
            serde_json::from_str(raw).map_err(|e| DecodeError::new(raw, e))?;
        Ok(self.accept(record))
    }

    /// Invokes the callback unless a cancel landed while the record was
    /// being translated.
    fn deliver(&self, event: &ProgressEvent) -> Disposition {
        if self.state.is_terminal() {
            debug!("dropping progress cancelled mid-delivery");
            return Disposition::Ignored;
        }
        (self.callback)(event);
        Disposition::Continue
    }

    fn finish(&mut self, outcome: Result<serde_json::Value, OperationError>) -> Disposition {
        if self.state.mark_terminal() {
            Disposition::Finished(outcome)
        } else {
            Disposition::Finished(Err(OperationError::Cancelled))
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("translator", &self.translator)
            .field("terminal", &self.state.is_terminal())
            .finish()
    }
}

/// Starts `request` on `transport` in the given slot.
///
/// Fails with [`OperationError::Busy`] if the slot is taken; the running
/// operation is not affected. The slot is released before the outcome is
/// delivered, whatever the outcome.
pub fn spawn_operation<T: OperationTransport>(
    transport: Arc<T>,
    slot: &OperationSlot,
    request: T::Request,
    callback: ProgressCallback,
) -> Result<PendingOperation, OperationError> {
    let guard = slot.try_acquire()?;

    let id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let state = Arc::new(OperationState::default());
    let handle = OperationHandle::new(id.clone(), cancel.clone(), Arc::clone(&state));
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let slot_name = slot.name();

    info!(op_id = %id, slot = slot_name, "operation started");

    tokio::spawn(async move {
        let mut sink = ProgressSink::with_state(callback, Arc::clone(&state));

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = transport.execute(request, &mut sink) => Some(res),
        };

        match finished {
            None => {
                info!(op_id = %id, slot = slot_name, "operation cancelled");
                transport.on_cancel();
                drop(guard);
                let _ = outcome_tx.send(Err(OperationError::Cancelled));
            }
            Some(result) => {
                state.mark_terminal();
                let result = if cancel.is_cancelled() {
                    Err(OperationError::Cancelled)
                } else {
                    result
                };
                match &result {
                    Ok(_) => info!(op_id = %id, slot = slot_name, "operation completed"),
                    Err(e) => info!(op_id = %id, slot = slot_name, error = %e, "operation failed"),
                }
                drop(guard);
                let _ = outcome_tx.send(result);
            }
        }
    });

    Ok(PendingOperation::new(handle, outcome_rx))
}
