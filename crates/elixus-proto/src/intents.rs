//! Gateway intents: the capability bitmask declared in [`Identify`](crate::Identify).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bitmask of event groups the client wants to receive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u64);

impl Intents {
    /// Guild lifecycle events.
    pub const GUILDS: Self = Self(1 << 0);
    /// Member join/update/leave (privileged).
    pub const GUILD_MEMBERS: Self = Self(1 << 1);
    /// Bans and audit log events.
    pub const GUILD_MODERATION: Self = Self(1 << 2);
    /// Emoji and sticker updates.
    pub const GUILD_EXPRESSIONS: Self = Self(1 << 3);
    /// Voice state updates.
    pub const GUILD_VOICE_STATES: Self = Self(1 << 7);
    /// Presence updates (privileged).
    pub const GUILD_PRESENCES: Self = Self(1 << 8);
    /// Messages in guild channels.
    pub const GUILD_MESSAGES: Self = Self(1 << 9);
    /// Reactions in guild channels.
    pub const GUILD_MESSAGE_REACTIONS: Self = Self(1 << 10);
    /// Direct messages.
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    /// Message content (privileged).
    pub const MESSAGE_CONTENT: Self = Self(1 << 15);

    /// No intents.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Intents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Intents({:#b})", self.0)
    }
}
