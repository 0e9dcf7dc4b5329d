//! Gateway close codes and what each one means for recovery.

use std::fmt;

/// Close code sent by the gateway when it terminates a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

/// What the client should do after the gateway closed with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and try to resume the session.
    Resume,
    /// Reconnect with a fresh identify; the session is gone.
    Reidentify,
    /// Do not reconnect; retrying cannot succeed.
    Fatal,
}

impl CloseCode {
    /// Normal closure; the remote discards the session.
    pub const NORMAL: Self = Self(1000);
    /// Closure used by the client to keep the session resumable.
    pub const RECONNECT: Self = Self(4000);
    /// The token sent with identify was rejected.
    pub const AUTHENTICATION_FAILED: Self = Self(4004);
    /// The sequence sent with resume was invalid.
    pub const INVALID_SEQ: Self = Self(4007);
    /// The session timed out.
    pub const SESSION_TIMED_OUT: Self = Self(4009);
    /// Invalid shard sent with identify.
    pub const INVALID_SHARD: Self = Self(4010);
    /// The session would handle too many guilds without sharding.
    pub const SHARDING_REQUIRED: Self = Self(4011);
    /// Invalid gateway API version.
    pub const INVALID_API_VERSION: Self = Self(4012);
    /// Invalid intents bitmask.
    pub const INVALID_INTENTS: Self = Self(4013);
    /// Intents the client is not approved for.
    pub const DISALLOWED_INTENTS: Self = Self(4014);

    /// Recovery action for this code.
    #[must_use]
    pub const fn action(self) -> CloseAction {
        match self.0 {
            4004 | 4010..=4014 => CloseAction::Fatal,
            4007 | 4009 => CloseAction::Reidentify,
            _ => CloseAction::Resume,
        }
    }

    /// Whether the code means the credentials were rejected.
    #[must_use]
    pub const fn is_authentication_failure(self) -> bool {
        self.0 == Self::AUTHENTICATION_FAILED.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
