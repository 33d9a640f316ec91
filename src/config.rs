// Configuration for the MPD session
//
// Settings live in a JSON document, either under "services" -> "mpd" or, for
// older files, directly under a top-level "mpd" key.

use crate::error::SessionError;
use crate::session::{WaitStrategy, DEFAULT_POLL_INTERVAL};
use crate::transport::{ConnectionParams, DEFAULT_PORT};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Look up a service section, preferring the "services" subtree
///
/// # Example
/// ```rust
/// use serde_json::json;
/// use mpdsession::config::get_service_config;
///
/// let config = json!({
///   "services": {
///     "mpd": { "host": "music.local" }
///   }
/// });
/// assert_eq!(get_service_config(&config, "mpd").unwrap()["host"], "music.local");
///
/// let old_config = json!({ "mpd": { "port": 6601 } });
/// assert_eq!(get_service_config(&old_config, "mpd").unwrap()["port"], 6601);
/// ```
pub fn get_service_config<'a>(config: &'a serde_json::Value, service_name: &str) -> Option<&'a serde_json::Value> {
    if let Some(service_config) = config.get("services").and_then(|s| s.get(service_name)) {
        debug!("Found {} configuration in services section", service_name);
        return Some(service_config);
    }

    if let Some(service_config) = config.get(service_name) {
        debug!("Found {} configuration at top level (legacy structure)", service_name);
        return Some(service_config);
    }

    debug!("No {} configuration found in either services section or top level", service_name);
    None
}

/// Connection and monitoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect and command timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between two monitor cycles when polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// "poll" or "idle"
    #[serde(default = "default_wait_strategy")]
    pub wait_strategy: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_wait_strategy() -> String {
    "poll".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_strategy: default_wait_strategy(),
        }
    }
}

impl SessionConfig {
    /// Read the "mpd" section of a full configuration document
    ///
    /// A document without such a section yields the defaults.
    pub fn from_json(config: &serde_json::Value) -> Result<Self, SessionError> {
        match get_service_config(config, "mpd") {
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| SessionError::Config(format!("Invalid mpd configuration: {}", e))),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| SessionError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Self::from_json(&value)
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::new(&self.host, self.port, Duration::from_millis(self.timeout_ms))
    }

    /// Unknown strategy names fall back to polling
    pub fn wait_strategy(&self) -> WaitStrategy {
        match self.wait_strategy.to_lowercase().as_str() {
            "idle" => WaitStrategy::Idle,
            "poll" => WaitStrategy::Poll(Duration::from_millis(self.poll_interval_ms)),
            other => {
                warn!("Unknown wait strategy '{}', polling instead", other);
                WaitStrategy::Poll(Duration::from_millis(self.poll_interval_ms))
            }
        }
    }
}
