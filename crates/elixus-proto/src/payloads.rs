//! Handshake payloads carried in the `d` field of control envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ProtoError;
use crate::intents::Intents;
use crate::opcode::Opcode;

/// Payload of [`Opcode::Hello`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Interval between heartbeats in milliseconds.
    pub heartbeat_interval: u64,
}

/// Client metadata sent with [`Identify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Library name.
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "elixus".to_string(),
            device: "elixus".to_string(),
        }
    }
}

/// Payload of [`Opcode::Identify`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Authentication token.
    pub token: String,
    /// Gateway intents bitmask.
    pub intents: Intents,
    /// Client metadata.
    pub properties: ConnectionProperties,
    /// Whether the server may compress payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    /// Member count above which offline members are omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    /// `[shard_id, num_shards]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

impl Identify {
    /// Create an identify payload with default properties.
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: ConnectionProperties::default(),
            compress: None,
            large_threshold: None,
            shard: None,
        }
    }

    /// Wrap into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn into_envelope(self) -> Result<Envelope, ProtoError> {
        to_envelope(Opcode::Identify, &self)
    }
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .field("compress", &self.compress)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .finish()
    }
}

/// Payload of [`Opcode::Resume`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Authentication token.
    pub token: String,
    /// Session to re-attach to.
    pub session_id: String,
    /// Last sequence number observed.
    pub seq: u64,
}

impl Resume {
    /// Wrap into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn into_envelope(self) -> Result<Envelope, ProtoError> {
        to_envelope(Opcode::Resume, &self)
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// The subset of the `READY` dispatch the gateway core needs.
///
/// Everything else in the payload is left for application handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Gateway protocol version.
    #[serde(default)]
    pub v: u8,
    /// Session identifier used for resuming.
    pub session_id: String,
    /// URL to reconnect to when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Parse the payload of [`Opcode::InvalidSession`], which is a bare boolean
/// saying whether the session may be resumed. A missing payload means no.
///
/// # Errors
///
/// Returns an error if the payload is neither a boolean nor null.
pub fn invalid_session_resumable(envelope: &Envelope) -> Result<bool, ProtoError> {
    match &envelope.d {
        Value::Bool(resumable) => Ok(*resumable),
        Value::Null => Ok(false),
        other => Err(ProtoError::UnexpectedPayload {
            op: envelope.op,
            reason: format!("expected boolean, got {other}"),
        }),
    }
}

fn to_envelope<T: Serialize>(op: Opcode, payload: &T) -> Result<Envelope, ProtoError> {
    let d = serde_json::to_value(payload).map_err(|e| ProtoError::Encoding(e.to_string()))?;
    Ok(Envelope::new(op, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hello_from_envelope() {
        let env = Envelope::new(Opcode::Hello, json!({"heartbeat_interval": 41250}));
        let hello: Hello = env.payload_as().unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_identify_envelope_shape() {
        let mut identify = Identify::new("secret", Intents::GUILDS | Intents::GUILD_MESSAGES);
        identify.shard = Some([0, 2]);
        let env = identify.into_envelope().unwrap();

        assert_eq!(env.op, Opcode::Identify);
        assert_eq!(env.d["token"], "secret");
        assert_eq!(env.d["intents"], 513);
        assert_eq!(env.d["shard"], json!([0, 2]));
        assert_eq!(env.d["properties"]["browser"], "elixus");
        assert!(env.d.get("compress").is_none());
    }

    #[test]
    fn test_resume_envelope_shape() {
        let resume = Resume {
            token: "secret".to_string(),
            session_id: "abc".to_string(),
            seq: 1337,
        };
        let env = resume.into_envelope().unwrap();
        assert_eq!(env.op, Opcode::Resume);
        assert_eq!(
            env.d,
            json!({"token": "secret", "session_id": "abc", "seq": 1337})
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let identify = Identify::new("super-secret", Intents::empty());
        let debug = format!("{identify:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));

        let resume = Resume {
            token: "super-secret".to_string(),
            session_id: "abc".to_string(),
            seq: 1,
        };
        assert!(!format!("{resume:?}").contains("super-secret"));
    }

    #[test]
    fn test_ready_ignores_extra_fields() {
        let env = Envelope::dispatch(
            1,
            "READY",
            json!({
                "v": 10,
                "session_id": "sess-1",
                "resume_gateway_url": "wss://resume.example.com",
                "user": {"id": "1"},
                "guilds": []
            }),
        );
        let ready: Ready = env.payload_as().unwrap();
        assert_eq!(ready.session_id, "sess-1");
        assert_eq!(
            ready.resume_gateway_url.as_deref(),
            Some("wss://resume.example.com")
        );
    }

    #[test]
    fn test_invalid_session_payload() {
        let yes = Envelope::new(Opcode::InvalidSession, json!(true));
        let no = Envelope::new(Opcode::InvalidSession, json!(false));
        let missing = Envelope::new(Opcode::InvalidSession, Value::Null);
        let bad = Envelope::new(Opcode::InvalidSession, json!({"resumable": true}));

        assert!(invalid_session_resumable(&yes).unwrap());
        assert!(!invalid_session_resumable(&no).unwrap());
        assert!(!invalid_session_resumable(&missing).unwrap());
        assert!(invalid_session_resumable(&bad).is_err());
    }
}
