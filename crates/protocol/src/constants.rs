use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Package file extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["dmg", "pkg", "app", "zip"];

/// Error message the server uses to reject an expired or invalid token.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// Query parameter carrying the bearer token on the upload URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Reconnection attempts after an unexpected close before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Base delay for linear reconnect backoff (`attempt * base`).
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Time the server has to answer the metadata frame with `ready`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the client pings the server.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline: if *nothing* arrives within this window the connection
/// is considered dead. Server-side finalization of a large package can be
/// quiet for a while, so this is well above the ping period.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum WebSocket message size (2 GiB). Packages travel as one frame.
pub const WS_MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Tokens expiring within this window are refreshed before use.
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Interval between `:keepalive` comments on an idle event stream.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Marker prefix of an event-stream data line.
pub const DATA_PREFIX: &str = "data:";

/// Marker prefix of an event-stream comment / keepalive line.
pub const COMMENT_PREFIX: char = ':';

/// Raw percent at which the server switches from byte transfer to
/// server-side finalization.
pub const PROCESSING_THRESHOLD: f64 = 95.0;

/// Display percent reached at the end of the transfer phase.
pub const TRANSFER_DISPLAY_CEILING: f64 = 90.0;

/// Discriminator of a server-to-client message on the upload channel.
///
/// The client's handler table is keyed by this enum, so the set of
/// dispatchable message types is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ready,
    Progress,
    Completed,
    Error,
}

impl MessageKind {
    /// All dispatchable kinds, in handler-table order.
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Ready,
        MessageKind::Progress,
        MessageKind::Completed,
        MessageKind::Error,
    ];

    /// Returns `true` for kinds that end an upload.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageKind::Completed | MessageKind::Error)
    }

    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ready => "ready",
            MessageKind::Progress => "progress",
            MessageKind::Completed => "completed",
            MessageKind::Error => "error",
        }
    }
}
