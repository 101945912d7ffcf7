//! Client configuration and endpoint derivation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ConnectOptions;

/// Realtime client configuration.
///
/// Deserializes from the boot payload handed to the desk on login; every
/// field is optional there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Page origin, e.g. `https://erp.example.com`
    pub origin: String,
    /// Skip all channel setup
    pub disable_async: bool,
    /// Development host override: connect to the realtime port on the
    /// origin's host instead of the origin itself
    pub dev_server: bool,
    /// Realtime port announced by the server, preferred in dev mode
    pub socketio_port: Option<u16>,
    /// Port used in dev mode when the server announced none
    pub default_port: u16,
    /// Path of the realtime endpoint
    pub socket_path: String,
    /// Cookie header sent with the handshake
    pub credentials: Option<String>,
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    /// Cooldown between admitted document subscribes
    pub doc_subscribe_cooldown_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".to_string(),
            disable_async: false,
            dev_server: false,
            socketio_port: None,
            default_port: 9000,
            socket_path: "/socket.io/".to_string(),
            credentials: None,
            reconnection_attempts: 3,
            reconnection_delay_ms: 1000,
            doc_subscribe_cooldown_ms: 1000,
        }
    }
}

impl RealtimeConfig {
    /// Configuration for the given origin, defaults elsewhere.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON boot payload.
    pub fn from_boot_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read overrides from `DESK_REALTIME_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(origin) = lookup("DESK_REALTIME_ORIGIN") {
            config.origin = origin;
        }
        if let Some(value) = lookup("DESK_REALTIME_DISABLE") {
            config.disable_async = parse_flag("DESK_REALTIME_DISABLE", &value)?;
        }
        if let Some(value) = lookup("DESK_REALTIME_DEV_SERVER") {
            config.dev_server = parse_flag("DESK_REALTIME_DEV_SERVER", &value)?;
        }
        if let Some(value) = lookup("DESK_REALTIME_PORT") {
            config.socketio_port = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DESK_REALTIME_PORT",
                value,
            })?);
        }
        if let Some(cookie) = lookup("DESK_REALTIME_COOKIE") {
            config.credentials = Some(cookie);
        }

        Ok(config)
    }

    /// `Some(true)` for https origins, `Some(false)` for http, `None` for
    /// anything the realtime channel cannot be opened from.
    pub fn secure(&self) -> Option<bool> {
        if self.origin.starts_with("https:") {
            Some(true)
        } else if self.origin.starts_with("http:") {
            Some(false)
        } else {
            None
        }
    }

    /// Host the channel connects to.
    ///
    /// Normally the origin itself. In dev mode the origin's port is
    /// replaced by `socketio_port`, falling back to `port`.
    pub fn host(&self, port: u16) -> String {
        if !self.dev_server {
            return self.origin.clone();
        }
        let port = self.socketio_port.unwrap_or(port);
        let parts: Vec<&str> = self.origin.split(':').collect();
        let base = if parts.len() > 2 {
            format!("{}:{}", parts[0], parts[1])
        } else {
            self.origin.clone()
        };
        format!("{base}:{port}")
    }

    /// Cooldown between admitted document subscribes.
    pub fn doc_subscribe_cooldown(&self) -> Duration {
        Duration::from_millis(self.doc_subscribe_cooldown_ms)
    }

    /// Connector options for this configuration.
    pub fn connect_options(&self, secure: bool) -> ConnectOptions {
        ConnectOptions {
            secure,
            with_credentials: true,
            credentials: self.credentials.clone(),
            path: self.socket_path.clone(),
            reconnection_attempts: self.reconnection_attempts,
            reconnection_delay: Duration::from_millis(self.reconnection_delay_ms),
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid boot payload: {0}")]
    Boot(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
