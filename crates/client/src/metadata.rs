//! Package metadata derived from a file on disk.

use std::path::Path;

use bytes::Bytes;

use pkgdeploy_protocol::{UploadMetadata, content_type_for};

use crate::error::ClientError;

/// Caller-supplied package details. Everything else comes from the file.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    /// Display name. Defaults to the file stem.
    pub name: Option<String>,
    pub category: String,
    pub version: String,
}

/// Builds and validates the upload metadata for `path` without reading
/// its contents.
pub async fn describe_package(
    path: &Path,
    info: &PackageInfo,
) -> Result<UploadMetadata, ClientError> {
    let stat = tokio::fs::metadata(path).await?;
    if !stat.is_file() {
        return Err(ClientError::NotAFile(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let name = info
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let metadata = UploadMetadata {
        name,
        category: info.category.clone(),
        version: info.version.clone(),
        size: stat.len(),
        content_type: content_type_for(&extension).to_string(),
        extension,
    };
    metadata.validate()?;
    Ok(metadata)
}

/// Reads the payload described by `metadata`.
///
/// Fails if the file no longer has the size recorded in the metadata.
pub async fn read_package(path: &Path, metadata: &UploadMetadata) -> Result<Bytes, ClientError> {
    let data = tokio::fs::read(path).await?;
    let actual = data.len() as u64;
    if actual != metadata.size {
        return Err(ClientError::SizeChanged {
            expected: metadata.size,
            actual,
        });
    }
    Ok(Bytes::from(data))
}
