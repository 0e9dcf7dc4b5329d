//! Error types for the elixus-proto crate.

use thiserror::Error;

use crate::opcode::Opcode;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A frame could not be decoded into an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope decoded, but its payload did not match the opcode.
    #[error("unexpected payload for {op}: {reason}")]
    UnexpectedPayload {
        /// Opcode of the offending envelope.
        op: Opcode,
        /// What was wrong with the payload.
        reason: String,
    },
}
