//! # elixus-gateway
//!
//! Client for a Discord-style real-time gateway: connects over WebSocket,
//! completes the Hello/Identify handshake, keeps the connection alive with
//! heartbeats, and recovers from disconnects by resuming the session or
//! identifying afresh.
//!
//! ```no_run
//! use elixus_gateway::{GatewayClient, GatewayConfig};
//!
//! # async fn example() -> Result<(), elixus_gateway::GatewayError> {
//! let config = GatewayConfig::new("token");
//! let mut client = GatewayClient::new(config);
//! client.router_mut().on_dispatch("MESSAGE_CREATE", |envelope| {
//!     println!("{}", envelope.d);
//! });
//! client.run().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gateway;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{
    ConnectionState, DisconnectCause, EventRouter, GatewayClient, GatewayEvent, GatewayHandle,
    ReconnectMode, Session,
};
