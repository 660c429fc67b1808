//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration. File: ~/.config/peerfs/config.toml or /etc/peerfs/config.toml.
/// Env overrides: PEERFS_API_PORT, PEERFS_DISCOVERY_PORT, PEERFS_TRANSPORT_PORT,
/// PEERFS_SHARED_DIR, PEERFS_DOWNLOAD_DIR, PEERFS_CHUNK_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP control plane port on 127.0.0.1 (default 8000).
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Discovery UDP port (default 45678).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Peer transport TCP port (default 45679).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Directory indexed and served at startup.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    /// Where control-plane downloads are saved.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

fn default_api_port() -> u16 {
    8000
}
fn default_discovery_port() -> u16 {
    45678
}
fn default_transport_port() -> u16 {
    45679
}
fn default_shared_dir() -> PathBuf {
    PathBuf::from("./shared")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_chunk_timeout_secs() -> u64 {
    60
}
fn default_search_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            shared_dir: default_shared_dir(),
            download_dir: default_download_dir(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl Config {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Apply overrides from `var` (the process environment in production). Unparsable values
    /// are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn port(v: Option<String>) -> Option<u16> {
            v.and_then(|s| s.trim().parse().ok())
        }
        if let Some(p) = port(var("PEERFS_API_PORT")) {
            self.api_port = p;
        }
        if let Some(p) = port(var("PEERFS_DISCOVERY_PORT")) {
            self.discovery_port = p;
        }
        if let Some(p) = port(var("PEERFS_TRANSPORT_PORT")) {
            self.transport_port = p;
        }
        if let Some(d) = var("PEERFS_SHARED_DIR").filter(|s| !s.is_empty()) {
            self.shared_dir = PathBuf::from(d);
        }
        if let Some(d) = var("PEERFS_DOWNLOAD_DIR").filter(|s| !s.is_empty()) {
            self.download_dir = PathBuf::from(d);
        }
        if let Some(t) = var("PEERFS_CHUNK_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok()) {
            self.chunk_timeout_secs = t;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = config_paths()
        .iter()
        .find(|p| p.exists())
        .and_then(|p| load_from(p))
        .unwrap_or_default();
    c.apply_overrides(|name| std::env::var(name).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerfs/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerfs/config.toml"));
    out
}

/// Parse one config file. A file that cannot be read or parsed is logged and skipped.
fn load_from(path: &Path) -> Option<Config> {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}
