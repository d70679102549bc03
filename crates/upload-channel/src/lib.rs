//! Authenticated duplex channel for package uploads.
//!
//! One WebSocket per [`DuplexUploadChannel`], opened with a JWT in the
//! query string. Unexpected closes trigger a bounded reconnect with linear
//! backoff; a rejected token is refreshed once and the socket replaced.
//! Uploads run the metadata, `ready`, binary-payload handshake through the
//! shared operation runner, so at most one upload is in flight per channel.

pub mod channel;
pub mod error;
pub mod handlers;
pub(crate) mod pumps;
pub(crate) mod reconnection;
pub mod token;
pub mod types;
pub mod upload;
pub(crate) mod ws_client;

#[cfg(test)]
pub(crate) mod test_support;

pub use channel::{DuplexUploadChannel, build_connect_url};
pub use error::ChannelError;
pub use handlers::{Handler, HandlerTable};
pub use token::{
    HttpTokenRefresher, RefreshFuture, TokenError, TokenManager, TokenRefresher, is_expired,
    jwt_expiry,
};
pub use types::{ChannelConfig, ConnectionState};
pub use upload::UploadRequest;
