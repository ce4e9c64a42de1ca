use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connector::ConnectorConfig;

// =============================================================================
// File config (figment-deserialized from defaults / portal.toml / env vars)
// =============================================================================
//
//   portal.toml:     [clipboard]
//                    poll_ms = 250
//
//   env var:         PORTAL_CLIPBOARD__POLL_MS=250   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub transport: TransportFileConfig,
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub display: DisplayFileConfig,
    #[serde(default)]
    pub clipboard: ClipboardFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Display tunnel endpoint (lives under `[transport]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    /// Tunnel names (`ssh`, `guacd`, `pve-qemu`, ...) are appended to this.
    #[serde(default = "default_tunnel_base")]
    pub base_url: String,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_tunnel_base(),
        }
    }
}

/// HTTP API used for file downloads (lives under `[api]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_api_base")]
    pub base_url: String,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayFileConfig {
    /// Safety resize poll; 0 disables it.
    #[serde(default = "default_poll_ms")]
    pub resize_poll_ms: u64,
}

impl Default for DisplayFileConfig {
    fn default() -> Self {
        Self {
            resize_poll_ms: default_poll_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipboardFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for ClipboardFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_ms: default_poll_ms(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub session_token: Option<String>,
}

fn default_tunnel_base() -> String {
    "ws://localhost:6989/api/servers/".to_string()
}
fn default_api_base() -> String {
    "http://localhost:6989/api".to_string()
}
fn default_poll_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

/// Default config file location: `~/.config/portal/portal.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("portal").join("portal.toml"))
}

/// Build a figment that layers: defaults → portal.toml → PORTAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PORTAL_AUTH__SESSION_TOKEN=abc`  →  `auth.session_token = "abc"`
///   `PORTAL_DISPLAY__RESIZE_POLL_MS=250`  →  `display.resize_poll_ms = 250`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("PORTAL_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub connector: ConnectorConfig,
    pub api_base: String,
    pub session_token: Option<String>,
}

impl PortalConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            connector: ConnectorConfig {
                tunnel_base: fc.transport.base_url.clone(),
                resize_poll: poll_duration(fc.display.resize_poll_ms),
                clipboard_poll: poll_duration(fc.clipboard.poll_ms),
                clipboard_enabled: fc.clipboard.enabled,
            },
            api_base: fc.api.base_url.clone(),
            session_token: fc.auth.session_token.clone().filter(|t| !t.is_empty()),
        }
    }

    /// Load from `path` (or the default location) plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = default_config_path();
        let path = path.or(default_path.as_deref());
        let fc: FileConfig = load_config(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        Ok(Self::from_file(&fc))
    }
}

/// A zero interval would spin; treat it as "effectively never".
fn poll_duration(ms: u64) -> Duration {
    if ms == 0 {
        Duration::from_secs(24 * 60 * 60)
    } else {
        Duration::from_millis(ms)
    }
}
