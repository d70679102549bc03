//! Fault-code vocabulary reported by the remote executor.

use serde::{Deserialize, Serialize};

/// Fallback text when neither the code nor the server message helps.
pub const UNKNOWN_ERROR_TEXT: &str = "An unknown error occurred";

/// Error codes the remote executor attaches to failed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    FileNotFound,
    ProcessRunning,
    InstallationCancelled,
    OperationCancelled,
    InvalidPackage,
    TimeoutError,
    Unknown,
}

impl ErrorCode {
    /// Parses a wire code. Returns `None` for codes outside the vocabulary.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "PERMISSION_DENIED" => Some(Self::PermissionDenied),
            "FILE_NOT_FOUND" => Some(Self::FileNotFound),
            "PROCESS_RUNNING" => Some(Self::ProcessRunning),
            "INSTALLATION_CANCELLED" => Some(Self::InstallationCancelled),
            "OPERATION_CANCELLED" => Some(Self::OperationCancelled),
            "INVALID_PACKAGE" => Some(Self::InvalidPackage),
            "TIMEOUT_ERROR" => Some(Self::TimeoutError),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns the wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::ProcessRunning => "PROCESS_RUNNING",
            Self::InstallationCancelled => "INSTALLATION_CANCELLED",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::InvalidPackage => "INVALID_PACKAGE",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Operator-facing text for the code.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Permission denied. Administrator privileges are required for this operation."
            }
            Self::FileNotFound => "The package file could not be found on the target host.",
            Self::ProcessRunning => {
                "The application is currently running. Quit it and try again."
            }
            Self::InstallationCancelled | Self::OperationCancelled => {
                "The operation was cancelled."
            }
            Self::InvalidPackage => "The package is invalid or corrupted.",
            Self::TimeoutError => "The operation timed out on the target host.",
            Self::Unknown => UNKNOWN_ERROR_TEXT,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the code of a remote failure.
///
/// An explicit `code` wins; otherwise the executor's convention of sending
/// the bare code as the message is honoured. Only exact matches count.
pub fn resolve_code(code: Option<&str>, message: &str) -> Option<ErrorCode> {
    code.and_then(ErrorCode::from_code)
        .or_else(|| ErrorCode::from_code(message))
}

/// Maps a remote failure to operator-facing text.
///
/// Known codes use the vocabulary table. Anything else falls back to the
/// server message verbatim, or [`UNKNOWN_ERROR_TEXT`] when it is blank.
pub fn describe_remote_error(code: Option<ErrorCode>, message: &str) -> String {
    match code {
        Some(ErrorCode::Unknown) | None => {
            let trimmed = message.trim();
            if trimmed.is_empty() || ErrorCode::from_code(trimmed).is_some() {
                UNKNOWN_ERROR_TEXT.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Some(known) => known.user_message().to_string(),
    }
}
