use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::OperationError;

/// One logical operation slot (upload, or install/uninstall).
///
/// Capacity is exactly one: a second acquire fails instead of queueing.
#[derive(Debug, Clone)]
pub struct OperationSlot {
    name: &'static str,
    busy: Arc<AtomicBool>,
}

impl OperationSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claims the slot, or fails with [`OperationError::Busy`].
    pub fn try_acquire(&self) -> Result<SlotGuard, OperationError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SlotGuard {
                busy: Arc::clone(&self.busy),
            })
            .map_err(|_| OperationError::Busy(self.name.to_string()))
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub(crate) struct OperationState {
    terminal: AtomicBool,
}

impl OperationState {
    /// Marks the operation terminal; returns `true` for the first caller.
    pub(crate) fn mark_terminal(&self) -> bool {
        !self.terminal.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }
}

/// Caller-side view of an in-flight operation.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: String,
    cancel: CancellationToken,
    state: Arc<OperationState>,
}

impl OperationHandle {
    pub(crate) fn new(id: String, cancel: CancellationToken, state: Arc<OperationState>) -> Self {
        Self { id, cancel, state }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancels the operation. Callbacks stop immediately and the outcome
    /// becomes [`OperationError::Cancelled`]. Later calls, or calls after
    /// the operation finished, do nothing.
    pub fn cancel(&self) {
        if self.state.mark_terminal() {
            self.cancel.cancel();
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// An operation handle plus its eventual outcome.
#[derive(Debug)]
pub struct PendingOperation {
    handle: OperationHandle,
    outcome: oneshot::Receiver<Result<serde_json::Value, OperationError>>,
}

impl PendingOperation {
    pub(crate) fn new(
        handle: OperationHandle,
        outcome: oneshot::Receiver<Result<serde_json::Value, OperationError>>,
    ) -> Self {
        Self { handle, outcome }
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Waits for the terminal outcome.
    pub async fn wait(self) -> Result<serde_json::Value, OperationError> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Connection(
                "operation task ended without a result".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one() {
        let slot = OperationSlot::new("upload");
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        match slot.try_acquire() {
            Err(OperationError::Busy(name)) => assert_eq!(name, "upload"),
            other => panic!("expected Busy, got {other:?}"),
        }
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_ok());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        let handle = OperationHandle::new(
            "op".into(),
            token.clone(),
            Arc::new(OperationState::default()),
        );
        handle.cancel();
        handle.cancel();
        assert!(handle.is_terminal());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_after_terminal_is_noop() {
        let token = CancellationToken::new();
        let state = Arc::new(OperationState::default());
        let handle = OperationHandle::new("op".into(), token.clone(), Arc::clone(&state));
        assert!(state.mark_terminal());
        handle.cancel();
        assert!(!token.is_cancelled());
    }
}
