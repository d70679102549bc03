use pkgdeploy_protocol::{ErrorCode, MetadataError, describe_remote_error};

/// A record that could not be parsed.
///
/// Never fatal on an intermediate frame; the operation runner only surfaces
/// it when the stream ends on a malformed fragment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed record {fragment:?}: {reason}")]
pub struct DecodeError {
    pub fragment: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(fragment: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            fragment: fragment.into(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal outcome of a failed upload or streamed operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{}", describe_remote_error(*.code, .message))]
    Remote {
        code: Option<ErrorCode>,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Decode(String),

    #[error("another {0} is already in progress")]
    Busy(String),

    #[error("invalid package metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl OperationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Fault code carried by a remote failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<DecodeError> for OperationError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<std::io::Error> for OperationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
