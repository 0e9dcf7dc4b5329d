//! Error types for the gateway client.

use thiserror::Error;

/// Errors that can occur in gateway operations.
///
/// Only [`GatewayError::AuthenticationRejected`], [`GatewayError::FatalClose`],
/// [`GatewayError::ReconnectExhausted`], and [`GatewayError::Config`] ever
/// escape [`GatewayClient::run`](crate::GatewayClient::run); everything else is
/// recovered by reconnecting.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The transport failed to open, send, or receive.
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway rejected the credentials sent with identify.
    #[error("authentication rejected (close code {code}): {reason}")]
    AuthenticationRejected {
        /// Close code sent by the gateway.
        code: u16,
        /// Close reason sent by the gateway.
        reason: String,
    },

    /// The gateway closed with a code that retrying cannot fix.
    #[error("gateway closed with fatal code {code}: {reason}")]
    FatalClose {
        /// Close code sent by the gateway.
        code: u16,
        /// Close reason sent by the gateway.
        reason: String,
    },

    /// The configured reconnection attempt limit was reached.
    #[error("gave up after {attempts} reconnection attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the client run loop must stop on this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRejected { .. }
                | Self::FatalClose { .. }
                | Self::ReconnectExhausted { .. }
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = GatewayError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport error: connection refused");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_authentication_rejected_is_fatal() {
        let err = GatewayError::AuthenticationRejected {
            code: 4004,
            reason: "Authentication failed.".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("4004"));
    }

    #[test]
    fn test_reconnect_exhausted_display() {
        let err = GatewayError::ReconnectExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "gave up after 5 reconnection attempts");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err = GatewayError::Config("token cannot be empty".to_string());
        assert!(err.is_fatal());
    }
}
