use pkgdeploy_protocol::{MessageKind, RecordStatus, StreamRecord, resolve_code};

use crate::error::DecodeError;
use crate::event::{EventKind, ProgressEvent};

/// Normalizes heterogeneous records into [`ProgressEvent`]s.
///
/// Holds per-operation state: the last percent (so percent never regresses),
/// the last non-blank message, and the cumulative detail log. Classification
/// looks only at the explicit `status` / `type` fields.
#[derive(Debug, Default)]
pub struct ProgressTranslator {
    last_percent: Option<f64>,
    last_message: Option<String>,
    details: Vec<String>,
}

impl ProgressTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and translates one raw payload.
    pub fn translate_str(&mut self, raw: &str) -> Result<ProgressEvent, DecodeError> {
        let record: StreamRecord =
            serde_json::from_str(raw).map_err(|e| DecodeError::new(raw, e))?;
        Ok(self.translate(record))
    }

    /// Translates an already-typed record.
    pub fn translate(&mut self, record: StreamRecord) -> ProgressEvent {
        let kind = classify(&record);

        if let Some(fragment) = non_blank(record.details.as_deref()) {
            self.details.push(fragment.to_string());
        }

        let mut event = ProgressEvent::new(kind);
        match kind {
            EventKind::Error => {
                let message = record.message.clone().unwrap_or_default();
                event.code = resolve_code(record.code.as_deref(), &message);
                event.message = Some(message);
                event.percent = self.last_percent;
            }
            EventKind::Completed => {
                self.last_percent = Some(100.0);
                event.percent = self.last_percent;
                event.message = self.carry_message(record.message.as_deref());
                event.payload = record.payload().cloned();
            }
            EventKind::Progress | EventKind::Ready => {
                if let Some(raw) = record.numeric_progress() {
                    self.advance_percent(raw);
                }
                event.percent = self.last_percent;
                event.message = self.carry_message(record.message.as_deref());
            }
        }
        event.details = self.cumulative_details();
        event
    }

    /// Last percent reported, after clamping.
    pub fn last_percent(&self) -> Option<f64> {
        self.last_percent
    }

    fn advance_percent(&mut self, raw: f64) {
        let clamped = raw.clamp(0.0, 100.0);
        let next = match self.last_percent {
            Some(prev) if prev > clamped => prev,
            _ => clamped,
        };
        self.last_percent = Some(next);
    }

    fn carry_message(&mut self, incoming: Option<&str>) -> Option<String> {
        if let Some(msg) = non_blank(incoming) {
            self.last_message = Some(msg.to_string());
        }
        self.last_message.clone()
    }

    fn cumulative_details(&self) -> Option<String> {
        if self.details.is_empty() {
            None
        } else {
            Some(self.details.join("\n"))
        }
    }
}

fn classify(record: &StreamRecord) -> EventKind {
    match record.status {
        Some(RecordStatus::Error) => EventKind::Error,
        Some(RecordStatus::Completed) => EventKind::Completed,
        _ if record.kind.as_deref() == Some(MessageKind::Ready.as_str()) => EventKind::Ready,
        _ => EventKind::Progress,
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}
