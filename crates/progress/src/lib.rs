//! Progress plumbing shared by both pkgdeploy transports.
//!
//! Bytes from an event stream go through [`EventStreamReader`] (line framing,
//! keepalive filtering) and [`ProgressTranslator`] (canonical
//! [`ProgressEvent`]s, monotonic percent, cumulative details). The
//! [`OperationTransport`] runner wraps either transport with the one-active
//! slot rule, cancellation and late-event suppression.

pub mod decoder;
pub mod error;
pub mod event;
pub mod handle;
pub mod phase;
pub mod reader;
pub mod transport;
pub mod translator;

pub use decoder::{BufferedLineDecoder, Utf8StreamDecoder};
pub use error::{DecodeError, OperationError};
pub use event::{EventKind, ProgressCallback, ProgressEvent};
pub use handle::{OperationHandle, OperationSlot, PendingOperation, SlotGuard};
pub use phase::{DisplayProgress, UploadPhase, display_progress};
pub use reader::EventStreamReader;
pub use transport::{
    Disposition, OperationTransport, ProgressSink, TransportFuture, spawn_operation,
};
pub use translator::ProgressTranslator;
