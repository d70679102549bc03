use serde::{Deserialize, Serialize};

use crate::constants::{MessageKind, UNAUTHORIZED_MESSAGE};
use crate::types::{RecordStatus, StreamRecord, UploadMetadata};

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Message sent by the server on the upload channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Metadata accepted; the server is ready for the binary frame.
    Ready,
    /// Intermediate progress. Producers send `percent` or `progress`;
    /// `percent` wins when both are present.
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    /// Terminal success with the stored package description.
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// Terminal failure.
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Forward compatibility: unknown `type` values deserialize here.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Shorthand for a progress message.
    pub fn progress(progress: f64, message: impl Into<String>) -> Self {
        Self::Progress {
            percent: None,
            progress: Some(progress),
            message: Some(message.into()),
            details: None,
        }
    }

    /// Shorthand for an error message with a vocabulary code.
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    /// The token-rejection message.
    pub fn unauthorized() -> Self {
        Self::error(UNAUTHORIZED_MESSAGE, None)
    }

    /// Returns the dispatch kind, or `None` for unknown messages.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Ready => Some(MessageKind::Ready),
            Self::Progress { .. } => Some(MessageKind::Progress),
            Self::Completed { .. } => Some(MessageKind::Completed),
            Self::Error { .. } => Some(MessageKind::Error),
            Self::Unknown => None,
        }
    }

    /// Returns `true` for `{type:"error", message:"Unauthorized"}`.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Error { message, .. } if message == UNAUTHORIZED_MESSAGE)
    }

    /// Converts the message into the record shape the progress translator
    /// consumes, so both transports share one normalization path.
    pub fn to_record(&self) -> StreamRecord {
        match self {
            Self::Ready => StreamRecord {
                kind: Some(MessageKind::Ready.as_str().to_string()),
                ..StreamRecord::default()
            },
            Self::Progress {
                percent,
                progress,
                message,
                details,
            } => StreamRecord {
                percent: *percent,
                progress: *progress,
                message: message.clone(),
                details: details.clone(),
                ..StreamRecord::default()
            },
            Self::Completed { data } => StreamRecord {
                status: Some(RecordStatus::Completed),
                data: data.clone(),
                ..StreamRecord::default()
            },
            Self::Error { message, code } => StreamRecord {
                status: Some(RecordStatus::Error),
                message: Some(message.clone()),
                code: code.clone(),
                ..StreamRecord::default()
            },
            Self::Unknown => StreamRecord::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Control message sent by the client after the metadata frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Best-effort request to abort the current upload.
    Cancel,
}

/// Any text frame a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientText {
    Control(ClientMessage),
    Metadata(UploadMetadata),
}

/// Parses a client text frame: control messages carry a `type`,
/// the metadata frame does not.
pub fn parse_client_text(text: &str) -> Result<ClientText, serde_json::Error> {
    serde_json::from_str(text)
}
