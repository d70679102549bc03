//! Client-side entry points for pkgdeploy.
//!
//! [`UploadSessionController`] drives one package upload from a local file:
//! it derives the metadata, reads the payload, sends it over the
//! [`DuplexUploadChannel`](pkgdeploy_upload_channel::DuplexUploadChannel) and
//! republishes progress on the phase-weighted display scale.
//! [`PackageClient`] bundles the channel with the install / uninstall client
//! around one shared token manager.

pub mod client;
pub mod controller;
pub mod error;
pub mod metadata;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ClientConfig, PackageClient};
pub use controller::{SessionEvent, UploadSessionController};
pub use error::ClientError;
pub use metadata::{PackageInfo, describe_package, read_package};
