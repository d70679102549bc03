//! One-stop client bundling the upload channel and the streamed-operation
//! client around a shared token manager.

use std::sync::Arc;

use pkgdeploy_operations::{OperationClientConfig, StreamedOperationClient};
use pkgdeploy_progress::{OperationError, PendingOperation, ProgressCallback};
use pkgdeploy_upload_channel::{ChannelConfig, DuplexUploadChannel, TokenManager};

use crate::controller::UploadSessionController;

/// Settings for both transports.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub operations: OperationClientConfig,
}

#[derive(Debug)]
pub struct PackageClient {
    tokens: Arc<TokenManager>,
    channel: DuplexUploadChannel,
    operations: StreamedOperationClient,
}

impl PackageClient {
    pub fn new(config: ClientConfig, tokens: Arc<TokenManager>) -> Result<Self, OperationError> {
        let channel = DuplexUploadChannel::new(config.channel, Arc::clone(&tokens));
        let operations = StreamedOperationClient::new(config.operations, Arc::clone(&tokens))?;
        Ok(Self {
            tokens,
            channel,
            operations,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn channel(&self) -> &DuplexUploadChannel {
        &self.channel
    }

    pub fn operations(&self) -> &StreamedOperationClient {
        &self.operations
    }

    /// A new upload controller on this client's channel. Controllers share
    /// the channel's single upload slot.
    pub fn upload_controller(&self) -> UploadSessionController {
        UploadSessionController::new(self.channel.clone())
    }

    pub fn install(
        &self,
        package_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, OperationError> {
        self.operations.install(package_id, on_progress)
    }

    pub fn uninstall(
        &self,
        package_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<PendingOperation, OperationError> {
        self.operations.uninstall(package_id, on_progress)
    }

    /// Closes the upload channel. In-flight uploads fail with a connection
    /// error.
    pub fn shutdown(&self) {
        self.channel.disconnect();
    }
}
