//! Extension points for the upload server.
//!
//! The server owns the socket, the handshake and cancellation; token
//! checks and package processing are delegated to these traits.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use pkgdeploy_protocol::{ErrorCode, ServerMessage, UploadMetadata};

use crate::connection::Sender;

/// A boxed future returned by [`PackageHandler::store`].
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decides whether the token presented on the upload URL is acceptable.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, token: &str) -> bool;
}

/// Accepts a fixed set of tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashSet<String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for StaticTokens {
    fn authorize(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Failure reported to the client as `{type:"error"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: Option<ErrorCode>,
    pub message: String,
}

impl Fault {
    /// A vocabulary fault. The bare code doubles as the message, which is
    /// what clients translate.
    pub fn code(code: ErrorCode) -> Self {
        Self {
            code: Some(code),
            message: code.as_str().to_string(),
        }
    }

    /// A free-text fault.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub(crate) fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.message.clone(), self.code.map(ErrorCode::as_str))
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) if code.as_str() != self.message => write!(f, "{code}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Progress channel handed to [`PackageHandler::store`].
#[derive(Clone)]
pub struct ProgressReporter {
    sender: Sender,
}

impl ProgressReporter {
    pub(crate) fn new(sender: Sender) -> Self {
        Self { sender }
    }

    /// Sends `{type:"progress"}`. Best effort: a full or closed buffer
    /// drops the update.
    pub fn report(&self, percent: f64, message: impl Into<String>) {
        let _ = self.sender.send_msg(&ServerMessage::progress(percent, message));
    }

    /// Like [`report`](Self::report) with a details fragment the client
    /// accumulates.
    pub fn detail(&self, percent: f64, message: impl Into<String>, details: impl Into<String>) {
        let _ = self.sender.send_msg(&ServerMessage::Progress {
            percent: None,
            progress: Some(percent),
            message: Some(message.into()),
            details: Some(details.into()),
        });
    }
}

/// Processes accepted packages.
pub trait PackageHandler: Send + Sync + 'static {
    /// Extra metadata checks run before `ready` is sent. The extension
    /// allow-list and the basic field checks have already passed.
    fn check_metadata(&self, _metadata: &UploadMetadata) -> Result<(), Fault> {
        Ok(())
    }

    /// Stores the package. `cancel` fires when the client sends `cancel`;
    /// the client is told about the cancellation whether or not the
    /// handler notices.
    fn store<'a>(
        &'a self,
        metadata: UploadMetadata,
        payload: Bytes,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerFuture<'a, Result<Option<serde_json::Value>, Fault>>;
}
