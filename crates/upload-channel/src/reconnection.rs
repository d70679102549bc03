//! Socket (re)establishment and the bounded reconnect loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::channel::{ChannelInner, build_connect_url};
use crate::error::ChannelError;
use crate::types::ConnectionState;
use crate::ws_client::{DisconnectCallback, WsConnection};

/// Opens a fresh socket with a valid token and installs it, replacing
/// (and closing) any previous one. Sets the state to `Open` on success.
pub(crate) async fn open_connection(inner: &Arc<ChannelInner>) -> Result<(), ChannelError> {
    let token = inner.tokens.valid_token().await?;
    let url = build_connect_url(&inner.config.upload_url, &token);

    let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
    let on_disconnect = disconnect_callback(Arc::downgrade(inner), generation);

    let conn = WsConnection::connect(
        &url,
        &inner.config,
        Arc::clone(&inner.handlers),
        on_disconnect,
    )
    .await?;

    if inner.generation.load(Ordering::Acquire) != generation {
        // A disconnect or newer connection superseded this attempt.
        conn.close();
        return Err(ChannelError::Closed);
    }

    if let Some(old) = inner.replace_connection(conn) {
        old.close();
    }
    inner.set_state(ConnectionState::Open);
    Ok(())
}

fn disconnect_callback(inner: Weak<ChannelInner>, generation: u64) -> DisconnectCallback {
    Box::new(move || {
        tokio::spawn(async move {
            if let Some(inner) = inner.upgrade() {
                handle_disconnect(inner, generation).await;
            }
        });
    })
}

/// Reacts to the read pump of socket `generation` exiting. Waits for any
/// in-flight connect so the socket is installed before it is torn down.
async fn handle_disconnect(inner: Arc<ChannelInner>, generation: u64) {
    let guard = inner.connect_lock.lock().await;
    if inner.generation.load(Ordering::Acquire) != generation {
        debug!(generation, "stale socket closed");
        return;
    }
    let dropped = inner.take_connection();
    drop(dropped);

    if inner.manual_disconnect.load(Ordering::Acquire) {
        inner.set_state(ConnectionState::Closed);
        return;
    }

    warn!("upload channel closed unexpectedly");
    inner.set_state(ConnectionState::Reconnecting { attempt: 1 });
    drop(guard);
    reconnect_loop(inner).await;
}

/// Up to `max_reconnect_attempts` tries with linear backoff. Exhaustion
/// leaves the channel `Closed`.
///
/// Each attempt holds the connect lock. Boxed to break the type cycle with
/// [`open_connection`], whose disconnect callback ends up here.
pub(crate) fn reconnect_loop(inner: Arc<ChannelInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let max = inner.config.max_reconnect_attempts;

        for attempt in 1..=max {
            inner.set_state(ConnectionState::Reconnecting { attempt });
            let delay = inner.config.delay_for_attempt(attempt);
            info!(attempt, max, delay_ms = delay.as_millis() as u64, "reconnecting");

            tokio::time::sleep(delay).await;

            let _guard = inner.connect_lock.lock().await;
            if superseded(&inner) {
                debug!("reconnect loop superseded");
                return;
            }
            match open_connection(&inner).await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    return;
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        warn!(max, "reconnection attempts exhausted, channel closed");
        inner.set_state(ConnectionState::Closed);
    })
}

/// `true` once a manual disconnect or an explicit (re)connect took over.
fn superseded(inner: &ChannelInner) -> bool {
    inner.manual_disconnect.load(Ordering::Acquire)
        || !matches!(inner.state(), ConnectionState::Reconnecting { .. })
}
