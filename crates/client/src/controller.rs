//! Upload session controller.
//!
//! Drives a single package upload from a local file and republishes the
//! channel's raw progress on the phase-weighted display scale. Callers
//! observe the session through [`SessionEvent`]s; [`cancel`] is the only
//! way to interrupt it.
//!
//! [`cancel`]: UploadSessionController::cancel

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pkgdeploy_progress::{
    DisplayProgress, OperationError, OperationHandle, ProgressCallback, ProgressEvent,
    UploadPhase, display_progress,
};
use pkgdeploy_upload_channel::DuplexUploadChannel;

use crate::error::ClientError;
use crate::metadata::{PackageInfo, describe_package, read_package};

const EVENT_BUFFER: usize = 256;

/// Event emitted while an upload session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress {
        phase: UploadPhase,
        /// Percent on the display scale.
        display_percent: f64,
        /// Percent as reported by the server.
        raw_percent: f64,
        message: String,
    },
    Completed {
        data: serde_json::Value,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: Option<OperationHandle>,
}

#[derive(Default)]
struct Shared {
    active: Mutex<Option<ActiveSession>>,
    progress: Mutex<Option<DisplayProgress>>,
}

impl Shared {
    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_progress(&self, progress: DisplayProgress) {
        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(progress);
    }
}

/// Clears the active session when the upload future completes or is dropped.
struct ActiveReset(Arc<Shared>);

impl Drop for ActiveReset {
    fn drop(&mut self) {
        self.0.active().take();
    }
}

/// Runs one upload at a time over a shared channel.
pub struct UploadSessionController {
    channel: DuplexUploadChannel,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl UploadSessionController {
    pub fn new(channel: DuplexUploadChannel) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            channel,
            shared: Arc::new(Shared::default()),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Last published display progress, if a session has reported any.
    pub fn progress(&self) -> Option<DisplayProgress> {
        *self.shared.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.shared.active().is_some()
    }

    /// Uploads the package at `path` and resolves with the server's
    /// completion payload.
    ///
    /// Fails with `Busy` while another session of this controller runs.
    pub async fn upload(
        &self,
        path: &Path,
        info: &PackageInfo,
    ) -> Result<serde_json::Value, ClientError> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.shared.active();
            if active.is_some() {
                return Err(OperationError::Busy("upload session".into()).into());
            }
            *active = Some(ActiveSession {
                cancel: cancel.clone(),
                handle: None,
            });
        }
        let _reset = ActiveReset(Arc::clone(&self.shared));

        let result = self.run(path, info, &cancel).await;
        match &result {
            Ok(data) => {
                info!(path = %path.display(), "upload completed");
                self.emit_terminal(SessionEvent::Completed { data: data.clone() })
                    .await;
            }
            Err(e) if e.is_cancelled() => {
                info!(path = %path.display(), "upload cancelled");
                self.emit_terminal(SessionEvent::Cancelled).await;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "upload failed");
                self.emit_terminal(SessionEvent::Failed {
                    error: e.to_string(),
                })
                .await;
            }
        }
        result
    }

    /// Cancels the running session. Returns `false` if none is running.
    pub fn cancel(&self) -> bool {
        let active = self.shared.active();
        let Some(session) = active.as_ref() else {
            return false;
        };
        session.cancel.cancel();
        if let Some(handle) = &session.handle {
            handle.cancel();
        }
        true
    }

    async fn run(
        &self,
        path: &Path,
        info: &PackageInfo,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ClientError> {
        self.publish(display_progress(0.0), 0.0, "Preparing package");

        let prepare = async {
            let metadata = describe_package(path, info).await?;
            let payload = read_package(path, &metadata).await?;
            Ok::<_, ClientError>((metadata, payload))
        };
        let (metadata, payload) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OperationError::Cancelled.into()),
            prepared = prepare => prepared?,
        };
        info!(
            name = %metadata.name,
            size = metadata.size,
            "starting upload"
        );

        let pending = self
            .channel
            .upload(metadata, payload, self.progress_callback())?;

        {
            let mut active = self.shared.active();
            if let Some(session) = active.as_mut() {
                if session.cancel.is_cancelled() {
                    pending.cancel();
                }
                session.handle = Some(pending.handle());
            }
        }

        Ok(pending.wait().await?)
    }

    fn progress_callback(&self) -> ProgressCallback {
        let shared = Arc::clone(&self.shared);
        let events_tx = self.events_tx.clone();
        Arc::new(move |event: &ProgressEvent| {
            let raw = event.percent_or_zero();
            let display = display_progress(raw);
            shared.set_progress(display);
            let _ = events_tx.try_send(SessionEvent::Progress {
                phase: display.phase,
                display_percent: display.percent,
                raw_percent: raw,
                message: event.message_or_empty().to_string(),
            });
        })
    }

    fn publish(&self, display: DisplayProgress, raw: f64, message: &str) {
        self.shared.set_progress(display);
        self.emit(SessionEvent::Progress {
            phase: display.phase,
            display_percent: display.percent,
            raw_percent: raw,
            message: message.to_string(),
        });
    }

    /// Progress is best effort: a full buffer drops the tick.
    fn emit(&self, event: SessionEvent) {
        if self.events_tx.try_send(event).is_err() {
            tracing::debug!("progress event dropped: receiver full or gone");
        }
    }

    /// Terminal events wait for buffer space once a consumer took the
    /// receiver.
    async fn emit_terminal(&self, event: SessionEvent) {
        if self.events_rx.is_some() {
            let _ = self.events_tx.try_send(event);
            return;
        }
        if self.events_tx.send(event).await.is_err() {
            tracing::debug!("session event receiver dropped");
        }
    }
}

impl std::fmt::Debug for UploadSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSessionController")
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_support::{ScriptedHandler, TestHost, write_package};

    use super::*;

    fn info() -> PackageInfo {
        PackageInfo {
            name: None,
            category: "Tools".into(),
            version: "1.0".into(),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn next_progress(rx: &mut mpsc::Receiver<SessionEvent>, raw: f64) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let SessionEvent::Progress { raw_percent, .. } = event {
                if raw_percent == raw {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn upload_publishes_phase_weighted_progress() {
        let host = TestHost::start(ScriptedHandler {
            steps: vec![(30.0, "receiving"), (96.0, "finalizing")],
            ..Default::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(&dir, "Tool.zip", 64);

        let mut controller = UploadSessionController::new(host.channel());
        let mut events = controller.take_events().unwrap();
        assert!(controller.take_events().is_none());

        let data = controller.upload(&path, &info()).await.unwrap();
        assert_eq!(data, serde_json::json!({"name": "Tool", "bytes": 64}));
        assert!(!controller.is_active());

        let events = drain(&mut events);
        assert_eq!(events.len(), 4, "{events:?}");
        assert_eq!(
            events[0],
            SessionEvent::Progress {
                phase: UploadPhase::Preparing,
                display_percent: 0.0,
                raw_percent: 0.0,
                message: "Preparing package".into(),
            }
        );
        assert_eq!(
            events[1],
            SessionEvent::Progress {
                phase: UploadPhase::Transferring,
                display_percent: display_progress(30.0).percent,
                raw_percent: 30.0,
                message: "receiving".into(),
            }
        );
        match &events[2] {
            SessionEvent::Progress {
                phase,
                display_percent,
                ..
            } => {
                assert_eq!(*phase, UploadPhase::Processing);
                assert!((display_percent - 92.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events[3], SessionEvent::Completed { .. }));

        let last = controller.progress().unwrap();
        assert_eq!(last.phase, UploadPhase::Processing);
    }

    #[tokio::test]
    async fn cancel_interrupts_processing() {
        let host = TestHost::start(ScriptedHandler {
            steps: vec![(50.0, "receiving")],
            hold: true,
            ..Default::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(&dir, "Tool.pkg", 16);

        let mut controller = UploadSessionController::new(host.channel());
        let mut events = controller.take_events().unwrap();
        let controller = Arc::new(controller);
        assert!(!controller.cancel());

        let running = {
            let controller = Arc::clone(&controller);
            let path = path.clone();
            tokio::spawn(async move { controller.upload(&path, &info()).await })
        };
        next_progress(&mut events, 50.0).await;
        assert!(controller.is_active());

        let busy = controller.upload(&path, &info()).await.unwrap_err();
        assert!(matches!(busy, ClientError::Operation(OperationError::Busy(_))));

        assert!(controller.cancel());
        let err = running.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!controller.is_active());

        let rest = drain(&mut events);
        assert!(rest.contains(&SessionEvent::Cancelled), "{rest:?}");
    }

    #[tokio::test]
    async fn rejected_metadata_fails_session() {
        let host = TestHost::start(ScriptedHandler {
            reject: true,
            ..Default::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(&dir, "Tool.dmg", 8);

        let mut controller = UploadSessionController::new(host.channel());
        let mut events = controller.take_events().unwrap();

        let err = controller.upload(&path, &info()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Operation(OperationError::Handshake(_))
        ));
        let events = drain(&mut events);
        assert!(matches!(events.last(), Some(SessionEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn invalid_file_fails_before_connecting() {
        let host = TestHost::start(ScriptedHandler::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(&dir, "setup.exe", 8);

        let mut controller = UploadSessionController::new(host.channel());
        let mut events = controller.take_events().unwrap();

        let err = controller.upload(&path, &info()).await.unwrap_err();
        assert!(matches!(err, ClientError::Metadata(_)));
        assert!(!controller.channel.state().is_open());

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SessionEvent::Failed { ref error } if error.contains("exe")));
    }

    #[tokio::test]
    async fn terminal_event_survives_full_buffer() {
        let steps: Vec<(f64, &'static str)> =
            (1..=300).map(|i| (f64::from(i) * 0.25, "tick")).collect();
        let host = TestHost::start(ScriptedHandler {
            steps,
            ..Default::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(&dir, "Tool.zip", 32);

        let mut controller = UploadSessionController::new(host.channel());
        let mut events = controller.take_events().unwrap();
        let controller = Arc::new(controller);

        let running = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.upload(&path, &info()).await })
        };

        // Let every tick arrive while nobody reads, so the buffer fills up.
        let last_tick = display_progress(75.0);
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.progress() != Some(last_tick) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!running.is_finished());

        let mut received = 0;
        let last = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            received += 1;
            if !matches!(event, SessionEvent::Progress { .. }) {
                break event;
            }
        };
        assert!(matches!(last, SessionEvent::Completed { .. }), "{last:?}");
        assert_eq!(received, EVENT_BUFFER + 1);
        running.await.unwrap().unwrap();
    }
}

