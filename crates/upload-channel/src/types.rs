//! Public types for the upload channel.

use std::time::Duration;

use pkgdeploy_protocol::constants::{
    HANDSHAKE_TIMEOUT, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, WS_MAX_MESSAGE_SIZE,
    WS_PING_PERIOD, WS_PONG_WAIT,
};

/// Connection state of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. Initial and final state.
    Closed,
    /// Opening the socket for an explicit `connect`.
    Connecting,
    /// Socket open; sends are accepted.
    Open,
    /// Unexpected close, reconnect attempt in progress.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, without the token query parameter.
    pub upload_url: String,
    /// Reconnection attempts after an unexpected close.
    pub max_reconnect_attempts: u32,
    /// Base of the linear backoff (`attempt * base`).
    pub reconnect_base_delay: Duration,
    /// Time allowed between the metadata frame and `ready`.
    pub handshake_timeout: Duration,
    pub ping_period: Duration,
    /// The connection is declared dead after this much inbound silence.
    pub read_deadline: Duration,
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            upload_url: "ws://127.0.0.1:8080/ws/upload".into(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: RECONNECT_BASE_DELAY,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            ping_period: WS_PING_PERIOD,
            read_deadline: WS_PONG_WAIT,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            ..Self::default()
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay.saturating_mul(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_equality() {
        assert_eq!(ConnectionState::Closed, ConnectionState::Closed);
        assert_ne!(ConnectionState::Open, ConnectionState::Connecting);
        assert_ne!(
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Reconnecting { attempt: 2 },
        );
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_open());
    }

    #[test]
    fn config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert!(config.read_deadline > config.ping_period);
    }

    #[test]
    fn backoff_is_linear() {
        let config = ChannelConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(3));
    }
}
