//! Gateway opcodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opcode carried by every gateway envelope.
///
/// Numbers the client does not know decode as [`Opcode::Unknown`] so newer
/// servers never break an older client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Opcode {
    /// An application event was dispatched (receive).
    Dispatch,
    /// Keep-alive ping; the server may also request one (send/receive).
    Heartbeat,
    /// Start a new session (send).
    Identify,
    /// Re-attach to a previous session (send).
    Resume,
    /// The server asks the client to reconnect and resume (receive).
    Reconnect,
    /// The session is invalid; payload says whether it can be resumed (receive).
    InvalidSession,
    /// First message after connecting, carries the heartbeat interval (receive).
    Hello,
    /// Acknowledgment of a heartbeat (receive).
    HeartbeatAck,
    /// An opcode this client does not understand.
    Unknown(u8),
}

impl Opcode {
    /// Every opcode the client understands.
    pub const KNOWN: [Self; 8] = [
        Self::Dispatch,
        Self::Heartbeat,
        Self::Identify,
        Self::Resume,
        Self::Reconnect,
        Self::InvalidSession,
        Self::Hello,
        Self::HeartbeatAck,
    ];

    /// Numeric value on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
            Self::Unknown(code) => code,
        }
    }

    /// Whether this opcode is one the client understands.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op.code()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown({code})"),
            known => write!(f, "{known:?}({})", known.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, Opcode::Dispatch ; "dispatch")]
    #[test_case(1, Opcode::Heartbeat ; "heartbeat")]
    #[test_case(2, Opcode::Identify ; "identify")]
    #[test_case(6, Opcode::Resume ; "resume")]
    #[test_case(7, Opcode::Reconnect ; "reconnect")]
    #[test_case(9, Opcode::InvalidSession ; "invalid session")]
    #[test_case(10, Opcode::Hello ; "hello")]
    #[test_case(11, Opcode::HeartbeatAck ; "heartbeat ack")]
    fn test_known_codes(code: u8, expected: Opcode) {
        assert_eq!(Opcode::from(code), expected);
        assert_eq!(expected.code(), code);
        assert!(expected.is_known());
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let op = Opcode::from(42);
        assert_eq!(op, Opcode::Unknown(42));
        assert_eq!(u8::from(op), 42);
        assert!(!op.is_known());
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::HeartbeatAck.to_string(), "HeartbeatAck(11)");
        assert_eq!(Opcode::Unknown(5).to_string(), "Unknown(5)");
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&Opcode::Hello).unwrap();
        assert_eq!(json, "10");
        let op: Opcode = serde_json::from_str("7").unwrap();
        assert_eq!(op, Opcode::Reconnect);
    }
}
