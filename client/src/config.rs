//! Client configuration.
//!
//! Both structs deserialize from JSON with every field optional, falling back
//! to the same defaults the command line uses.

use serde::Deserialize;
use shared::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_RELAY_URL,
    DEFAULT_THROTTLE_MS,
};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Options for the low-latency socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    pub url: String,
    pub auto_reconnect: bool,
    #[serde(rename = "reconnectInterval", with = "millis")]
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "transport url must use ws:// or wss://, got {:?}",
                self.url
            )));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Options for a [`SyncManager`](crate::sync::SyncManager) session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(rename = "throttleMs", with = "millis")]
    pub throttle_window: Duration,
    /// When false, motion falls back to the position table's update feed.
    pub use_transport: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_millis(DEFAULT_THROTTLE_MS),
            use_transport: true,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
