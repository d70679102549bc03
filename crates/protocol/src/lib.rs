//! Wire protocol shared by the pkgdeploy client and the upload server.
//!
//! Two transports carry these types:
//! - the duplex upload channel (WebSocket): [`UploadMetadata`] and
//!   [`ClientMessage`] upstream, [`ServerMessage`] downstream;
//! - the install/uninstall event stream (HTTP body): one [`StreamRecord`]
//!   per `data:` line.

pub mod constants;
pub mod error_codes;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageKind;
pub use error_codes::{ErrorCode, UNKNOWN_ERROR_TEXT, describe_remote_error, resolve_code};
pub use messages::{ClientMessage, ClientText, ServerMessage, parse_client_text};
pub use types::{
    MetadataError, RecordStatus, StreamRecord, UploadMetadata, content_type_for,
    is_allowed_extension,
};
