//! Execution-host side of the pkgdeploy transfer protocol.
//!
//! [`UploadServer`] accepts authenticated WebSocket connections and runs the
//! upload handshake (metadata, `ready`, one binary frame, progress, one
//! terminal message) against a [`PackageHandler`]. [`event_stream_body`]
//! encodes install / uninstall progress as a `text/event-stream` body.

mod connection;
mod event_stream;
mod handler;
mod server;
mod session;

pub use connection::{SendError, Sender};
pub use event_stream::{EventStreamWriter, event_stream_body};
pub use handler::{Authorizer, Fault, HandlerFuture, PackageHandler, ProgressReporter, StaticTokens};
pub use server::{ServerConfig, UploadServer};

/// Send buffer capacity per connection.
///
/// Handlers may report progress faster than a slow client reads it; a
/// full buffer drops progress updates rather than blocking the handler.
pub const SEND_BUFFER_SIZE: usize = 1024;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("client presented no valid token")]
    Unauthorized,
}
