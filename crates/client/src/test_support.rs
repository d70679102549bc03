use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use pkgdeploy_protocol::{ErrorCode, UploadMetadata};
use pkgdeploy_upload_channel::{ChannelConfig, DuplexUploadChannel, TokenManager};
use pkgdeploy_upload_server::{
    Fault, HandlerFuture, PackageHandler, ProgressReporter, ServerConfig, StaticTokens,
    UploadServer,
};

pub(crate) fn fresh_jwt() -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"client","exp":{exp}}}"#));
    format!("{header}.{claims}.sig")
}

/// Reports `steps` as progress, then either completes or holds until the
/// client cancels.
#[derive(Default)]
pub(crate) struct ScriptedHandler {
    pub(crate) steps: Vec<(f64, &'static str)>,
    pub(crate) hold: bool,
    pub(crate) reject: bool,
}

impl PackageHandler for ScriptedHandler {
    fn check_metadata(&self, _metadata: &UploadMetadata) -> Result<(), Fault> {
        if self.reject {
            Err(Fault::code(ErrorCode::InvalidPackage))
        } else {
            Ok(())
        }
    }

    fn store<'a>(
        &'a self,
        metadata: UploadMetadata,
        payload: Bytes,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerFuture<'a, Result<Option<serde_json::Value>, Fault>> {
        Box::pin(async move {
            for (percent, message) in &self.steps {
                progress.report(*percent, *message);
            }
            if self.hold {
                cancel.cancelled().await;
            }
            Ok(Some(serde_json::json!({
                "name": metadata.name,
                "bytes": payload.len(),
            })))
        })
    }
}

pub(crate) struct TestHost {
    server: Arc<UploadServer<StaticTokens, ScriptedHandler>>,
    pub(crate) token: String,
    pub(crate) upload_url: String,
}

impl TestHost {
    pub(crate) async fn start(handler: ScriptedHandler) -> Self {
        let token = fresh_jwt();
        let server = UploadServer::new(
            ServerConfig::default(),
            StaticTokens::new([token.clone()]),
            handler,
        );
        let listener = server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve(listener).await });
        Self {
            server,
            token,
            upload_url: format!("ws://{addr}/ws/upload"),
        }
    }

    pub(crate) fn channel(&self) -> DuplexUploadChannel {
        DuplexUploadChannel::new(
            ChannelConfig::new(self.upload_url.clone()),
            Arc::new(TokenManager::new(self.token.clone(), None)),
        )
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

pub(crate) fn write_package(dir: &tempfile::TempDir, name: &str, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, vec![0x5a; len]).unwrap();
    path
}
