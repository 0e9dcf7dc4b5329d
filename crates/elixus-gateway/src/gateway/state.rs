//! Connection state types.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// State of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; initial and terminal state.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for Hello.
    AwaitingHello,
    /// Identify sent, waiting for `READY`.
    Identifying,
    /// Resume sent, waiting for `RESUMED`.
    Resuming,
    /// Session established; receiving events.
    Connected,
    /// Shutting down after cancellation.
    Closing,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::AwaitingHello,
            3 => Self::Identifying,
            4 => Self::Resuming,
            5 => Self::Connected,
            _ => Self::Closing,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Atomic mirror of the connection state for observers outside the
/// connection task. Only the connection task stores into it.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
