//! Gateway client configuration.
//!
//! Loaded from TOML, for example:
//!
//! ```toml
//! url = "wss://gateway.discord.gg"
//! token = "..."
//! intents = 513
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use elixus_proto::{ConnectionProperties, Identify, Intents};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GatewayError;
use crate::gateway::ReconnectConfig;

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Default gateway API version.
pub const DEFAULT_API_VERSION: u8 = 10;

/// Longest accepted wait for Hello.
pub const MAX_HELLO_TIMEOUT_SECS: u64 = 3600;

/// Heartbeat and handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// How long to wait for Hello after the transport opens.
    pub hello_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            hello_timeout_secs: 20,
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Backoff before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per failed attempt.
    pub backoff_multiplier: f64,
    /// Give up after this many consecutive failures (unlimited when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            max_attempts: defaults.max_attempts,
        }
    }
}

/// Main gateway configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Authentication token.
    #[serde(default)]
    pub token: String,
    /// Intents bitmask.
    #[serde(default)]
    pub intents: u64,
    /// Gateway API version appended to the connect URL.
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// Offline member threshold sent with identify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    /// `[shard_id, num_shards]` sent with identify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    /// Client metadata sent with identify.
    #[serde(default)]
    pub properties: ConnectionProperties,
    /// Heartbeat settings.
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    /// Reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

fn default_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

const fn default_api_version() -> u8 {
    DEFAULT_API_VERSION
}

impl GatewayConfig {
    /// Create a configuration with defaults and the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            url: default_url(),
            token: token.into(),
            intents: 0,
            api_version: DEFAULT_API_VERSION,
            large_threshold: None,
            shard: None,
            properties: ConnectionProperties::default(),
            heartbeat: HeartbeatSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }

    /// Set the gateway URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the intents.
    #[must_use]
    pub const fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents.bits();
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Does not validate, so that command line overrides can be applied
    /// first; call [`GatewayConfig::validate`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, GatewayError> {
        toml::from_str(content).map_err(|e| GatewayError::Config(format!("invalid TOML: {e}")))
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("failed to serialize config: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::Config("token cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(GatewayError::Config(
                "url must start with ws:// or wss://".to_string(),
            ));
        }
        Url::parse(&self.url).map_err(|e| GatewayError::Config(format!("invalid url: {e}")))?;

        if self.heartbeat.hello_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "heartbeat.hello_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.hello_timeout_secs > MAX_HELLO_TIMEOUT_SECS {
            return Err(GatewayError::Config(format!(
                "heartbeat.hello_timeout_secs must not exceed {MAX_HELLO_TIMEOUT_SECS}"
            )));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err(GatewayError::Config(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(GatewayError::Config(
                "reconnect.max_delay_ms must not be below reconnect.initial_delay_ms".to_string(),
            ));
        }

        if self.reconnect.backoff_multiplier.is_nan() || self.reconnect.backoff_multiplier < 1.0 {
            return Err(GatewayError::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if let Some([id, count]) = self.shard {
            if count == 0 || id >= count {
                return Err(GatewayError::Config(format!(
                    "invalid shard [{id}, {count}]: id must be below a non-zero count"
                )));
            }
        }

        Ok(())
    }

    /// How long to wait for Hello.
    #[must_use]
    pub const fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat.hello_timeout_secs)
    }

    /// Backoff configuration for the reconnection policy.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            backoff_multiplier: self.reconnect.backoff_multiplier,
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Identify payload built from this configuration.
    #[must_use]
    pub fn identify(&self) -> Identify {
        Identify {
            token: self.token.clone(),
            intents: Intents::from_bits(self.intents),
            properties: self.properties.clone(),
            compress: None,
            large_threshold: self.large_threshold,
            shard: self.shard,
        }
    }

    /// URL to open, given an optional resume URL from a previous session.
    ///
    /// The API version and JSON encoding are appended as query parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn connect_url(&self, resume_url: Option<&str>) -> Result<Url, GatewayError> {
        let base = resume_url.unwrap_or(&self.url);
        let mut url =
            Url::parse(base).map_err(|e| GatewayError::Config(format!("invalid url '{base}': {e}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("v", &self.api_version.to_string())
            .append_pair("encoding", "json");
        Ok(url)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("api_version", &self.api_version)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .field("properties", &self.properties)
            .field("heartbeat", &self.heartbeat)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}
