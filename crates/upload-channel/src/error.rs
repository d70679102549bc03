use pkgdeploy_progress::OperationError;
use tokio_tungstenite::tungstenite;

use crate::token::TokenError;

/// Errors from the upload channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel is not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("server rejected the connection (HTTP {0})")]
    Rejected(u16),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl ChannelError {
    /// Classifies a failed WebSocket upgrade.
    pub(crate) fn from_connect(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(ref resp)
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                ChannelError::Rejected(resp.status().as_u16())
            }
            other => ChannelError::Ws(other),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChannelError::Rejected(_) | ChannelError::Token(_))
    }
}

impl From<ChannelError> for OperationError {
    fn from(e: ChannelError) -> Self {
        if e.is_auth() {
            OperationError::Auth(e.to_string())
        } else {
            OperationError::Connection(e.to_string())
        }
    }
}
