//! Configuration resolution for `VeilRelay`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/veilrelay/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)
//!
//! Files may be partial: any key they omit keeps the value from the layer
//! below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::wire::DEFAULT_MAX_FRAME_BYTES;

/// Complete `VeilRelay` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub max_frame_bytes: usize,
    /// Outbound frames buffered per connection before it counts as stalled.
    pub outbound_queue: usize,
    /// Note attached to every frame duplicated to monitors.
    pub monitor_note: String,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue: 64,
            monitor_note: "INTERCEPTED - Cannot decrypt without private key".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Chat client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_addr: String,
    pub max_frame_bytes: usize,
    /// Seconds a pending key exchange waits for its reply.
    pub handshake_timeout_secs: u64,
    /// `exchange-key` requests sent before an exchange is abandoned.
    pub handshake_max_attempts: u32,
    /// `xchacha20-poly1305` (default) or `aes-256-ctr`.
    pub cipher_suite: String,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:3000".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            handshake_timeout_secs: 30,
            handshake_max_attempts: 3,
            cipher_suite: "xchacha20-poly1305".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` must exist when given; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    load_config_with(
        global_config_path().as_deref(),
        explicit,
        |key| std::env::var(key).ok(),
    )
}

/// [`load_config`] with the global path and environment injected.
pub fn load_config_with(
    global: Option<&Path>,
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global.filter(|p| p.exists()) {
        merge_json(&mut merged, read_config_value(global_path)?);
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_json(&mut merged, read_config_value(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("veilrelay").join("settings.json"))
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else
/// replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("VEILRELAY_LISTEN_ADDR") {
        config.relay.listen_addr = val;
    }
    if let Some(n) = env("VEILRELAY_MAX_FRAME_BYTES").and_then(|v| v.parse().ok()) {
        config.relay.max_frame_bytes = n;
        config.client.max_frame_bytes = n;
    }
    if let Some(val) = env("VEILRELAY_LOG_LEVEL") {
        config.relay.log_level.clone_from(&val);
        config.client.log_level = val;
    }
    if let Some(val) = env("VEILRELAY_RELAY_ADDR") {
        config.client.relay_addr = val;
    }
    if let Some(n) = env("VEILRELAY_HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.client.handshake_timeout_secs = n;
    }
    if let Some(n) = env("VEILRELAY_HANDSHAKE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.client.handshake_max_attempts = n;
    }
    if let Some(val) = env("VEILRELAY_CIPHER_SUITE") {
        config.client.cipher_suite = val;
    }
}
