//! Server configuration: TOML file + CLI overrides.

use roomrelay_core::{RelayError, RelayResult, RoomId};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub store: StoreSection,
    /// Shareable link -> room id.
    #[serde(default)]
    pub rooms: HashMap<String, RoomId>,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            send_timeout_ms: default_send_timeout_ms(),
            outbound_queue: default_outbound_queue(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_auth_attempts")]
    pub auth_attempts_per_minute: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            auth_attempts_per_minute: default_auth_attempts(),
        }
    }
}

/// `[store]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Append-only event log. Events are kept in memory when unset.
    #[serde(default)]
    pub event_log: Option<String>,
    /// Events retained by the in-memory store.
    #[serde(default = "default_memory_events")]
    pub memory_events: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            event_log: None,
            memory_events: default_memory_events(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    8080
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_outbound_queue() -> usize {
    64
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}
fn default_auth_attempts() -> u32 {
    30
}
fn default_memory_events() -> usize {
    10_000
}

/// Values given on the command line (or via environment), applied on top of
/// the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub event_log: Option<String>,
    pub send_timeout_ms: Option<u64>,
}

/// Resolved server configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub send_timeout: Duration,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    pub jwt_secret: String,
    pub auth_attempts_per_minute: u32,
    pub event_log: Option<PathBuf>,
    pub memory_events: usize,
    pub rooms: HashMap<String, RoomId>,
}

impl ServerConfig {
    /// Load config from a TOML file (if it exists), then apply overrides.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Parse the contents of a config file.
    pub fn parse_file(content: &str) -> RelayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Merge a parsed file with overrides.
    pub fn resolve(file_config: ConfigFile, overrides: ConfigOverrides) -> RelayResult<Self> {
        let jwt_secret = overrides
            .jwt_secret
            .or(file_config.auth.jwt_secret)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                RelayError::Config(
                    "no JWT secret: set [auth] jwt_secret, --jwt-secret or JWT_SECRET".into(),
                )
            })?;

        let event_log = overrides
            .event_log
            .or(file_config.store.event_log)
            .map(|s| expand_tilde_str(&s));
        let send_timeout_ms = overrides
            .send_timeout_ms
            .unwrap_or(file_config.server.send_timeout_ms);

        Ok(Self {
            bind: overrides.bind.unwrap_or(file_config.server.bind),
            port: overrides.port.unwrap_or(file_config.server.port),
            send_timeout: Duration::from_millis(send_timeout_ms),
            outbound_queue: file_config.server.outbound_queue.max(1),
            max_frame_bytes: file_config.server.max_frame_bytes,
            jwt_secret,
            auth_attempts_per_minute: file_config.auth.auth_attempts_per_minute,
            event_log,
            memory_events: file_config.store.memory_events,
            rooms: file_config.rooms,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
