use serde::{Deserialize, Serialize};

use crate::constants::ALLOWED_EXTENSIONS;

/// Package description sent as the first frame of an upload.
///
/// Immutable once the handshake starts; both sides validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub name: String,
    pub category: String,
    pub version: String,
    /// Payload size in bytes.
    pub size: u64,
    pub content_type: String,
    /// Lowercase file extension without the dot.
    pub extension: String,
}

/// Reasons an [`UploadMetadata`] is rejected before any bytes move.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("package name is empty")]
    EmptyName,

    #[error("package version is empty")]
    EmptyVersion,

    #[error("package is empty")]
    EmptyPayload,

    #[error("unsupported file extension: {0:?} (allowed: dmg, pkg, app, zip)")]
    UnsupportedExtension(String),
}

impl UploadMetadata {
    /// Checks the metadata against the upload rules.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if self.version.trim().is_empty() {
            return Err(MetadataError::EmptyVersion);
        }
        if self.size == 0 {
            return Err(MetadataError::EmptyPayload);
        }
        if !is_allowed_extension(&self.extension) {
            return Err(MetadataError::UnsupportedExtension(self.extension.clone()));
        }
        Ok(())
    }
}

/// Returns `true` if `ext` (with or without a leading dot) is on the allow-list.
pub fn is_allowed_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Returns the MIME type the client declares for a package extension.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "dmg" => "application/x-apple-diskimage",
        "pkg" => "application/vnd.apple.installer+xml",
        "zip" | "app" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Explicit `status` of an event-stream record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
    Error,
    /// Any other status string (`"running"`, `"installing"`, ...).
    #[serde(other)]
    Other,
}

/// One JSON record of the install/uninstall event stream.
///
/// Producers are inconsistent: the numeric field is either `percent` or
/// `progress`, and the status may be implicit. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    /// Discriminator used by upload-channel messages (`"ready"`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl StreamRecord {
    /// A progress record.
    pub fn progress(percent: f64, message: impl Into<String>) -> Self {
        Self {
            percent: Some(percent),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A terminal success record.
    pub fn completed(data: Option<serde_json::Value>) -> Self {
        Self {
            status: Some(RecordStatus::Completed),
            data,
            ..Self::default()
        }
    }

    /// A terminal failure record.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Error),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Best available numeric progress: `percent` beats `progress`.
    pub fn numeric_progress(&self) -> Option<f64> {
        self.percent.or(self.progress).filter(|v| v.is_finite())
    }

    /// `true` for an explicit `completed` or `error` status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            Some(RecordStatus::Completed) | Some(RecordStatus::Error)
        )
    }

    /// Result payload of a completed record (`data` beats `result`).
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().or(self.result.as_ref())
    }
}
