use std::sync::Arc;

use pkgdeploy_protocol::ErrorCode;

/// Classification of a translated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Progress,
    Error,
    Completed,
    Ready,
}

impl EventKind {
    /// `Completed` and `Error` end an operation.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Error)
    }
}

/// Canonical progress event delivered to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub kind: EventKind,
    /// Raw percent in `[0, 100]`, never lower than a previous event's.
    pub percent: Option<f64>,
    pub message: Option<String>,
    /// Cumulative, newline-joined detail log.
    pub details: Option<String>,
    pub payload: Option<serde_json::Value>,
    /// Resolved fault code of an `Error` event.
    pub code: Option<ErrorCode>,
}

impl ProgressEvent {
    pub(crate) fn new(kind: EventKind) -> Self {
        Self {
            kind,
            percent: None,
            message: None,
            details: None,
            payload: None,
            code: None,
        }
    }

    /// Percent, or 0 when the stream has not reported one yet.
    pub fn percent_or_zero(&self) -> f64 {
        self.percent.unwrap_or(0.0)
    }

    /// Message, or an empty string.
    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// Progress callback shared between the caller and the operation task.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;
