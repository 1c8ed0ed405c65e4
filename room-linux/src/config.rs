//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use room_core::ProximityLevel;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/roomdetect/config.toml or /etc/roomdetect/config.toml.
/// Env overrides: ROOMDETECT_DISCOVERY_PORT, ROOMDETECT_MESH_PORT, ROOMDETECT_LOG_LEVEL,
/// ROOMDETECT_DISPLAY_NAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Proximity beacon UDP multicast port (default 45780).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Mesh session TCP port (default 45781).
    #[serde(default = "default_mesh_port")]
    pub mesh_port: u16,
    #[serde(default = "default_eviction_timeout_secs")]
    pub eviction_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_invite_timeout_secs")]
    pub invite_timeout_secs: u64,
    /// LAN beacons carry no signal strength; every ranged peer gets this level.
    #[serde(default = "default_lan_proximity_level")]
    pub lan_proximity_level: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Display name used when no profile exists yet.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Where the key-value state file lives (default ~/.local/share/roomdetect).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_discovery_port() -> u16 {
    45780
}
fn default_mesh_port() -> u16 {
    45781
}
fn default_eviction_timeout_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_invite_timeout_secs() -> u64 {
    10
}
fn default_lan_proximity_level() -> String {
    "near".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            mesh_port: default_mesh_port(),
            eviction_timeout_secs: default_eviction_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            invite_timeout_secs: default_invite_timeout_secs(),
            lan_proximity_level: default_lan_proximity_level(),
            log_level: default_log_level(),
            display_name: None,
            state_dir: None,
        }
    }
}

impl Config {
    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_secs(self.eviction_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }

    /// Falls back to `near` on an unparseable value.
    pub fn lan_level(&self) -> ProximityLevel {
        self.lan_proximity_level.parse().unwrap_or_else(|e| {
            tracing::warn!("{}; using near", e);
            ProximityLevel::Near
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("roomdetect")
        })
    }
}

/// Load config: merge default, then config file (explicit path or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let file = match explicit {
        Some(p) => load_path(p),
        None => load_file(),
    };
    let mut c = file.unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("ROOMDETECT_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(p) = var("ROOMDETECT_MESH_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.mesh_port = p;
    }
    if let Some(level) = var("ROOMDETECT_LOG_LEVEL") {
        c.log_level = level;
    }
    if let Some(name) = var("ROOMDETECT_DISPLAY_NAME") {
        c.display_name = Some(name);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        out.push(dir.join("roomdetect/config.toml"));
    }
    out.push(PathBuf::from("/etc/roomdetect/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    config_paths()
        .into_iter()
        .find(|p| p.exists())
        .and_then(|p| load_path(&p))
}

fn load_path(p: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("cannot read config {}: {}", p.display(), e);
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("invalid config {}: {}", p.display(), e);
            None
        }
    }
}
