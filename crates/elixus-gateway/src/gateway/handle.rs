//! Cloneable handle for observing and stopping a running client.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::state::{AtomicConnectionState, ConnectionState};

/// Observes and stops a [`GatewayClient`](super::GatewayClient) from other
/// tasks.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    pub(crate) state: Arc<AtomicConnectionState>,
    pub(crate) shutdown: CancellationToken,
}

impl GatewayHandle {
    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Ask the client to close its connection and return.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
