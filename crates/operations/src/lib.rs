//! Streamed install / uninstall operations.
//!
//! [`StreamedOperationClient`] posts to the operation endpoint and feeds the
//! `text/event-stream` response through the shared progress pipeline.

pub mod client;
pub mod config;
pub mod stream;

pub use client::{OperationKind, OperationRequest, StreamedOperationClient, endpoint_url};
pub use config::OperationClientConfig;
pub use stream::consume_event_stream;
