use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

// =============================================================================
// File config (figment-deserialized from defaults / souk.toml / env vars)
// =============================================================================
//
//   souk.toml:       [typing]
//                    debounce_ms = 1500
//
//   env var:         SOUK_TYPING__DEBOUNCE_MS=1500   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub typing: TypingFileConfig,
    #[serde(default)]
    pub delivery: DeliveryFileConfig,
}

/// Endpoints (lives under `[server]` in souk.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// Connection tunables (lives under `[connection]` in souk.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// How often the connected flag is republished to dependents.
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

/// Typing indicator tunables (lives under `[typing]` in souk.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypingFileConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for TypingFileConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Delivery outcome fan-out (lives under `[delivery]` in souk.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryFileConfig {
    #[serde(default = "default_outcome_buffer")]
    pub outcome_buffer: usize,
}

impl Default for DeliveryFileConfig {
    fn default() -> Self {
        Self {
            outcome_buffer: default_outcome_buffer(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://localhost:3001/ws".to_string()
}
fn default_api_base_url() -> String {
    "http://localhost:3001/api".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_liveness_interval_secs() -> u64 {
    5
}
fn default_inbound_buffer() -> usize {
    256
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_outcome_buffer() -> usize {
    64
}

/// Build a figment that layers: defaults → souk.toml → SOUK_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SOUK_SERVER__WS_URL=wss://chat.example`  →  `server.ws_url`
///   `SOUK_TYPING__DEBOUNCE_MS=1500`           →  `typing.debounce_ms`
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("SOUK_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub ws_url: String,
    pub api_base_url: String,
}

/// Connection manager settings (runtime view).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub handshake_timeout: Duration,
    pub liveness_interval: Duration,
    /// Capacity of the inbound frame channel between transport and reader.
    pub inbound_buffer: usize,
}

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(fc.handshake_timeout_secs.max(1)),
            liveness_interval: Duration::from_secs(fc.liveness_interval_secs.max(1)),
            inbound_buffer: fc.inbound_buffer.max(1),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

/// Fully resolved client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    /// Quiet period after the last keystroke before `typing_stop` is sent.
    pub typing_debounce: Duration,
    pub outcome_buffer: usize,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            server: ServerConfig {
                ws_url: fc.server.ws_url.clone(),
                api_base_url: fc.server.api_base_url.trim_end_matches('/').to_string(),
            },
            connection: ConnectionConfig::from_file(&fc.connection),
            typing_debounce: Duration::from_millis(fc.typing.debounce_ms),
            outcome_buffer: fc.delivery.outcome_buffer.max(1),
        }
    }

    /// Load from defaults, an optional souk.toml, and `SOUK_*` env vars.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let fc: FileConfig = load_config(config_file).extract()?;
        Ok(Self::from_file(&fc))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
