//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/pkgdeploy/client.toml`
//! - Windows: `%APPDATA%/pkgdeploy/client.toml`
//!
//! Command-line flags override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the install / uninstall HTTP API.
    pub server_url: String,

    /// Upload WebSocket endpoint, without the token parameter.
    pub upload_url: String,

    /// Bearer token. Usually supplied through `PKGDEPLOY_TOKEN` instead.
    pub access_token: String,

    pub refresh_token: String,

    /// Token refresh endpoint. Refresh is disabled when empty.
    pub refresh_endpoint: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            upload_url: "ws://127.0.0.1:8080/ws/upload".into(),
            access_token: String::new(),
            refresh_token: String::new(),
            refresh_endpoint: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn refresh_enabled(&self) -> bool {
        !self.refresh_endpoint.is_empty() && !self.refresh_token.is_empty()
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("pkgdeploy")
            .join("client.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("pkgdeploy").join("client.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/pkgdeploy/client.toml")
    }
}
