//! Inbound message dispatch keyed by [`MessageKind`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use pkgdeploy_protocol::{MessageKind, ServerMessage};
use tracing::trace;

/// Handler for one message kind.
pub type Handler = Arc<dyn Fn(ServerMessage) + Send + Sync>;

/// At most one handler per message kind.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<MessageKind, Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn on(&self, kind: MessageKind, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, handler);
    }

    /// Removes the handler for `kind`.
    pub fn off(&self, kind: MessageKind) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind);
    }

    /// Registers `handler` for `kind` and returns the one it replaced.
    pub(crate) fn swap(&self, kind: MessageKind, handler: Handler) -> Option<Handler> {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, handler)
    }

    /// Puts `previous` back for `kind`, unless something other than
    /// `current` was registered in the meantime.
    pub(crate) fn restore(
        &self,
        kind: MessageKind,
        current: &Handler,
        previous: Option<Handler>,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let still_current = handlers
            .get(&kind)
            .is_some_and(|h| Arc::ptr_eq(h, current));
        if !still_current {
            return;
        }
        match previous {
            Some(h) => {
                handlers.insert(kind, h);
            }
            None => {
                handlers.remove(&kind);
            }
        }
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&kind)
    }

    /// Delivers `msg` to the handler for its kind. Returns `false` if the
    /// message was dropped.
    pub fn dispatch(&self, msg: ServerMessage) -> bool {
        let Some(kind) = msg.kind() else {
            trace!("no kind for inbound message, dropping");
            return false;
        };
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned();
        match handler {
            Some(h) => {
                h(msg);
                true
            }
            None => {
                trace!(kind = kind.as_str(), "no handler registered, dropping");
                false
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<MessageKind> = self
            .handlers
            .read()
            .map(|h| h.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}
