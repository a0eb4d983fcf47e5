//! Configuration system for Courier.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $COURIER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/courier/config.toml
//!   3. ~/.config/courier/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::Padding;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub broker: BrokerConfig,
    pub channels: ChannelConfig,
    pub key: KeyConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname or IP.
    pub address: String,
    pub port: u16,
    /// MQTT keepalive. The client pings at half this interval.
    pub keepalive_secs: u16,
    pub client_id: String,
    /// How long to wait for CONNACK before giving up.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel whose messages are echoed to the console.
    pub inbound: String,
    /// Channel every envelope is published to.
    pub outbound: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Directory identifiers are resolved against.
    pub dir: PathBuf,
    /// Recipient public key identifier.
    pub identifier: String,
    pub padding: Padding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Resolved message records are forgotten after this many seconds.
    pub retention_secs: u64,
}

impl SessionConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "mqtt.eclipseprojects.io".to_string(),
            port: 1883,
            keepalive_secs: 120,
            client_id: "courier-access-node".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound: "/topic/topic2".to_string(),
            outbound: "/topic/topic3".to_string(),
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            dir: config_dir().join("keys"),
            identifier: "public_key_hardware_node_1.pem".to_string(),
            padding: Padding::Pkcs1v15,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention_secs: 300,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("courier")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CourierConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CourierConfig::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("COURIER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CourierConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply COURIER_* overrides. Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("COURIER_BROKER__ADDRESS") {
            self.broker.address = v;
        }
        if let Some(v) = var("COURIER_BROKER__PORT") {
            match v.parse() {
                Ok(p) => self.broker.port = p,
                Err(_) => tracing::warn!(value = %v, "ignoring COURIER_BROKER__PORT"),
            }
        }
        if let Some(v) = var("COURIER_BROKER__KEEPALIVE_SECS") {
            match v.parse() {
                Ok(k) => self.broker.keepalive_secs = k,
                Err(_) => tracing::warn!(value = %v, "ignoring COURIER_BROKER__KEEPALIVE_SECS"),
            }
        }
        if let Some(v) = var("COURIER_KEY__IDENTIFIER") {
            self.key.identifier = v;
        }
        if let Some(v) = var("COURIER_KEY__PADDING") {
            match v.parse() {
                Ok(p) => self.key.padding = p,
                Err(e) => tracing::warn!(error = %e, "ignoring COURIER_KEY__PADDING"),
            }
        }
        if let Some(v) = var("COURIER_SESSION__RETENTION_SECS") {
            match v.parse() {
                Ok(r) => self.session.retention_secs = r,
                Err(_) => tracing::warn!(value = %v, "ignoring COURIER_SESSION__RETENTION_SECS"),
            }
        }
    }
}
