//! # elixus-proto
//!
//! Wire definitions for the Elixus gateway protocol: opcodes, the envelope
//! codec, handshake payloads, intents, and close codes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close_code;
pub mod envelope;
pub mod error;
pub mod intents;
pub mod opcode;
pub mod payloads;

pub use close_code::{CloseAction, CloseCode};
pub use envelope::{decode, encode, Envelope};
pub use error::ProtoError;
pub use intents::Intents;
pub use opcode::Opcode;
pub use payloads::{invalid_session_resumable, ConnectionProperties, Hello, Identify, Ready, Resume};
