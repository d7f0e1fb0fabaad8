//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Host configuration. File: ~/.config/hostbridge/config.toml or /etc/hostbridge/config.toml.
/// Env overrides: HOSTBRIDGE_CHUNK_SIZE, HOSTBRIDGE_POLL_MS, HOSTBRIDGE_MAX_POLLS, HOSTBRIDGE_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Bytes per chunk the host writes (default 512 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Native-side poll interval in milliseconds (default 16, one frame).
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Polls before the native side gives up on a transfer (default 1000).
    #[serde(default = "default_max_polls")]
    pub max_polls: u64,
    /// Where saved downloads land (default current directory).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Session manager settings.
    #[serde(default)]
    pub core: hostbridge_core::Config,
}

fn default_chunk_size() -> usize {
    hostbridge_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_poll_ms() -> u64 {
    16
}
fn default_max_polls() -> u64 {
    1000
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            poll_ms: default_poll_ms(),
            max_polls: default_max_polls(),
            download_dir: default_download_dir(),
            core: hostbridge_core::Config::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> HostConfig {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |name| std::env::var(name).ok());
    c
}

/// Apply overrides from `lookup` (the process environment outside tests). Unparsable values are ignored.
pub fn apply_env<F>(c: &mut HostConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(n) = lookup("HOSTBRIDGE_CHUNK_SIZE").and_then(|s| s.parse::<usize>().ok()) {
        if n > 0 {
            c.chunk_size = n;
        }
    }
    if let Some(n) = lookup("HOSTBRIDGE_POLL_MS").and_then(|s| s.parse::<u64>().ok()) {
        c.poll_ms = n;
    }
    if let Some(n) = lookup("HOSTBRIDGE_MAX_POLLS").and_then(|s| s.parse::<u64>().ok()) {
        c.max_polls = n;
    }
    if let Some(dir) = lookup("HOSTBRIDGE_DOWNLOAD_DIR") {
        if !dir.is_empty() {
            c.download_dir = PathBuf::from(dir);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/hostbridge/config.toml"));
    }
    out.push(PathBuf::from("/etc/hostbridge/config.toml"));
    out
}

fn load_file() -> Option<HostConfig> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<HostConfig>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
