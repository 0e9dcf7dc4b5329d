//! Session state: everything needed to resume after a disconnect.

use std::time::Duration;

use elixus_proto::{Envelope, Hello, Ready};

/// Session bookkeeping owned by the connection task.
///
/// Mutated only on the receive path ([`Session::observe`]), on handshake
/// completion ([`Session::establish`], [`Session::set_heartbeat_interval`]),
/// and by [`Session::reset`] when the reconnection policy demands a fresh
/// identify.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    session_id: Option<String>,
    resume_url: Option<String>,
    last_sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sequence of a dispatch envelope.
    ///
    /// Keeps the maximum seen so duplicate or reordered delivery never moves
    /// the sequence backwards.
    pub fn observe(&mut self, envelope: &Envelope) {
        if let Some(seq) = envelope.sequence() {
            self.last_sequence = Some(self.last_sequence.map_or(seq, |last| last.max(seq)));
        }
    }

    /// Forget the session so the next connection identifies fresh.
    ///
    /// The sequence goes too: a new session numbers its events from scratch.
    pub fn reset(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.last_sequence = None;
    }

    /// Record the session created by a `READY` dispatch.
    pub fn establish(&mut self, ready: &Ready) {
        self.session_id = Some(ready.session_id.clone());
        self.resume_url.clone_from(&ready.resume_gateway_url);
    }

    /// Record the heartbeat interval announced by Hello.
    pub fn set_heartbeat_interval(&mut self, hello: Hello) {
        self.heartbeat_interval = Some(Duration::from_millis(hello.heartbeat_interval));
    }

    /// Whether a resume can be attempted.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        self.session_id.is_some() && self.last_sequence.is_some()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// URL to reconnect to when resuming.
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Highest dispatch sequence observed.
    #[must_use]
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Heartbeat interval from the most recent Hello.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }
}
