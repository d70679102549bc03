//! Client error types.

use std::path::PathBuf;

use pkgdeploy_progress::OperationError;
use pkgdeploy_protocol::MetadataError;

/// Errors produced while preparing or running a client operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("package changed on disk: expected {expected} bytes, read {actual}")]
    SizeChanged { expected: u64, actual: u64 },

    #[error("invalid package metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Operation(e) if e.is_cancelled())
    }
}
