//! Reconnection policy: resume or re-identify, and how long to wait.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use super::session::Session;

/// Configuration for reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum number of reconnection attempts (None = infinite).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Capped exponential delay for the given attempt number, before jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = self.initial_delay.as_millis() as f64 * multiplier;
        let max_millis = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_millis.min(max_millis) as u64)
    }

    /// Check if we should attempt reconnection.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Spread a backoff delay over `[base / 2, base]`.
#[must_use]
pub fn with_jitter(base: Duration) -> Duration {
    let half = base / 2;
    let spread = (base - half).as_millis() as u64;
    if spread == 0 {
        return base;
    }
    half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Why a connection ended. Consumed exactly once by [`ReconnectPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Transport failure, unexpected close, or a malformed frame.
    NetworkError {
        /// Human readable reason for logs.
        reason: String,
    },
    /// The gateway sent a Reconnect control envelope.
    ServerRequestedReconnect,
    /// The gateway invalidated the session.
    InvalidSession {
        /// Whether the gateway allows resuming it.
        resumable: bool,
    },
    /// A heartbeat went unacknowledged for a full interval.
    HeartbeatTimeout,
    /// Cancellation was requested.
    UserCancelled,
}

impl DisconnectCause {
    /// Shorthand for a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkError {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError { reason } => write!(f, "network error: {reason}"),
            Self::ServerRequestedReconnect => f.write_str("server requested reconnect"),
            Self::InvalidSession { resumable } => {
                write!(f, "invalid session (resumable: {resumable})")
            }
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::UserCancelled => f.write_str("cancelled"),
        }
    }
}

/// How the next connection should establish its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Re-attach with the stored session id and sequence.
    Resume,
    /// Discard the session and identify from scratch.
    FreshIdentify,
}

/// Decision returned by [`ReconnectPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Reconnect after `delay`.
    Reconnect {
        /// Resume or fresh identify.
        mode: ReconnectMode,
        /// Time to wait before opening the transport.
        delay: Duration,
        /// Consecutive attempt number since the last successful connect.
        attempt: u32,
    },
    /// Stop for good; the caller asked for it.
    Shutdown,
    /// The attempt limit was reached.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
}

/// Decides how to recover from each [`DisconnectCause`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy with the given backoff configuration.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive attempts since the last successful connect.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures; called whenever the client reaches Connected.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Decide what to do after a disconnect.
    ///
    /// Resume is only chosen when the session can actually be resumed; the
    /// caller must reset the session whenever the mode is
    /// [`ReconnectMode::FreshIdentify`].
    pub fn decide(&mut self, cause: &DisconnectCause, session: &Session) -> ReconnectAction {
        let wants_resume = match cause {
            DisconnectCause::UserCancelled => return ReconnectAction::Shutdown,
            DisconnectCause::InvalidSession { resumable } => *resumable,
            DisconnectCause::NetworkError { .. }
            | DisconnectCause::ServerRequestedReconnect
            | DisconnectCause::HeartbeatTimeout => true,
        };

        if !self.config.should_reconnect(self.attempt) {
            return ReconnectAction::GiveUp {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;

        let mode = if wants_resume && session.is_resumable() {
            ReconnectMode::Resume
        } else {
            ReconnectMode::FreshIdentify
        };

        let delay = match cause {
            DisconnectCause::ServerRequestedReconnect | DisconnectCause::InvalidSession { .. } => {
                Duration::ZERO
            }
            _ => with_jitter(self.config.delay_for_attempt(self.attempt)),
        };

        ReconnectAction::Reconnect {
            mode,
            delay,
            attempt: self.attempt,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
