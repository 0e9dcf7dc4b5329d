//! Gateway connection core.
//!
//! [`GatewayClient`] runs one connection at a time over a [`Transport`]. Each
//! connection has a reader task and a heartbeat timer feeding a single
//! connection task, which owns the [`Session`] and the state machine. When a
//! connection ends, the [`ReconnectPolicy`] decides between resuming,
//! identifying afresh, and stopping.

mod client;
mod connection;
mod events;
mod handle;
mod heartbeat;
mod reconnect;
mod router;
mod session;
mod state;
mod transport;

pub use client::GatewayClient;
pub use events::GatewayEvent;
pub use handle::GatewayHandle;
pub use heartbeat::{
    deadline_after, initial_jitter, start_heartbeat_task, Beat, BeatOutcome, HeartbeatHandle,
    HeartbeatStatus, MAX_HEARTBEAT_INTERVAL,
};
pub use reconnect::{
    with_jitter, DisconnectCause, ReconnectAction, ReconnectConfig, ReconnectMode, ReconnectPolicy,
};
pub use router::{EventRouter, Handler};
pub use session::Session;
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{Frame, FrameReceiver, FrameSender, Transport, WsReceiver, WsSender, WsTransport};
