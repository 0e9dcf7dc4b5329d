//! Envelope wire codec.
//!
//! Every frame exchanged with the gateway is a JSON object of the form
//! `{"op": <u8>, "d": <any>, "s": <u64|null>, "t": <string|null>}`.
//! `s` and `t` are only populated on [`Opcode::Dispatch`] envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::opcode::Opcode;

/// A decoded gateway message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode.
    pub op: Opcode,
    /// Sequence number (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    /// Payload; `null` when absent.
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    /// Create a control envelope with no sequence or event name.
    #[must_use]
    pub const fn new(op: Opcode, d: Value) -> Self {
        Self {
            op,
            s: None,
            t: None,
            d,
        }
    }

    /// Create a dispatch envelope.
    #[must_use]
    pub fn dispatch(seq: u64, event: impl Into<String>, d: Value) -> Self {
        Self {
            op: Opcode::Dispatch,
            s: Some(seq),
            t: Some(event.into()),
            d,
        }
    }

    /// Create a heartbeat carrying the last observed sequence.
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(Opcode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    /// Sequence number, only reported for dispatch envelopes.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        if self.op == Opcode::Dispatch {
            self.s
        } else {
            None
        }
    }

    /// Event name, only reported for dispatch envelopes.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        if self.op == Opcode::Dispatch {
            self.t.as_deref()
        } else {
            None
        }
    }

    /// Deserialize the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnexpectedPayload`] if the payload does not
    /// have the expected shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        T::deserialize(&self.d).map_err(|e| ProtoError::UnexpectedPayload {
            op: self.op,
            reason: e.to_string(),
        })
    }

    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        serde_json::to_vec(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::MalformedEnvelope`] if a required field is
    /// missing or any field has the wrong shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        serde_json::from_slice(bytes).map_err(|e| ProtoError::MalformedEnvelope(e.to_string()))
    }
}

/// Encode an envelope from its parts.
///
/// # Errors
///
/// Returns an error if serialization fails, which cannot happen for a
/// payload built from [`serde_json::Value`].
pub fn encode(
    op: Opcode,
    seq: Option<u64>,
    event: Option<&str>,
    payload: Value,
) -> Result<Vec<u8>, ProtoError> {
    Envelope {
        op,
        s: seq,
        t: event.map(str::to_owned),
        d: payload,
    }
    .to_bytes()
}

/// Decode an envelope.
///
/// # Errors
///
/// Returns [`ProtoError::MalformedEnvelope`] for structurally invalid frames.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtoError> {
    Envelope::from_bytes(bytes)
}
