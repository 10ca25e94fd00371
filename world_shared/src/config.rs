//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default so partial files are accepted.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration for the sync client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the registration/state API, e.g. `http://127.0.0.1:8000`.
    pub api_base: String,
    /// User identifier sent on registration.
    pub user_id: u64,
    /// Target simulation/render rate.
    pub fps: u32,
    /// How often the host delivers frame callbacks.
    pub host_refresh_hz: u32,
    /// Linear reconnect backoff step.
    pub backoff_base_ms: u64,
    /// Upper bound for a single reconnect delay.
    pub backoff_max_ms: u64,
    /// A registration, socket open or state fetch that takes longer fails.
    pub connect_timeout_ms: u64,
    /// Movement speed of movable units, world units per second.
    pub movement_speed: f32,
    /// Minimum interval between on-screen label refreshes.
    pub label_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".to_string(),
            user_id: 1,
            fps: 60,
            host_refresh_hz: 144,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            connect_timeout_ms: 10_000,
            movement_speed: 5.0,
            label_interval_ms: 250,
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ClientConfig::from_json_str(r#"{"user_id": 7, "fps": 30}"#).unwrap();
        assert_eq!(cfg.user_id, 7);
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.api_base, "http://127.0.0.1:8000");
        assert_eq!(cfg.backoff_base(), Duration::from_secs(1));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
    }
}
