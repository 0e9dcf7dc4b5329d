//! Lifecycle events emitted by the gateway client.

use std::time::Duration;

use super::reconnect::{DisconnectCause, ReconnectMode};

/// Lifecycle events for observers; application payloads go through the
/// [`EventRouter`](super::EventRouter) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A session is live.
    Connected {
        /// Session identifier, if the gateway assigned one.
        session_id: Option<String>,
        /// Whether an existing session was resumed.
        resumed: bool,
    },
    /// The connection ended.
    Disconnected {
        /// Why it ended.
        cause: DisconnectCause,
    },
    /// Attempting reconnection.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Resume or fresh identify.
        mode: ReconnectMode,
    },
    /// A heartbeat was acknowledged.
    HeartbeatAcked {
        /// Round trip of the heartbeat.
        latency: Duration,
    },
}
