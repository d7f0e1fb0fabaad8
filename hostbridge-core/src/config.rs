//! Session manager tuning. Deserializable so hosts can embed it in their own config file.

use serde::Deserialize;

/// Default cap on a single payload (256 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// Default idle ticks before an unfinished session is reaped.
pub const DEFAULT_OPEN_SESSION_TTL_TICKS: u64 = 600;

/// How chunk offsets within one session are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOrder {
    /// Each chunk must start at or after the end of the previous one.
    #[default]
    Strict,
    /// Any order; overlapping writes replace earlier bytes.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub chunk_order: ChunkOrder,
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
    /// 0 disables reaping of open sessions.
    #[serde(default = "default_open_session_ttl_ticks")]
    pub open_session_ttl_ticks: u64,
    /// 0 keeps completed sessions until consumed.
    #[serde(default)]
    pub completed_session_ttl_ticks: u64,
}

fn default_max_payload_len() -> usize {
    DEFAULT_MAX_PAYLOAD_LEN
}
fn default_open_session_ttl_ticks() -> u64 {
    DEFAULT_OPEN_SESSION_TTL_TICKS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_order: ChunkOrder::default(),
            max_payload_len: default_max_payload_len(),
            open_session_ttl_ticks: default_open_session_ttl_ticks(),
            completed_session_ttl_ticks: 0,
        }
    }
}

impl Config {
    /// Parse from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let c = Config::from_toml_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.chunk_order, ChunkOrder::Strict);
    }

    #[test]
    fn overrides_parse() {
        let c = Config::from_toml_str(
            "chunk_order = \"lenient\"\nmax_payload_len = 1024\ncompleted_session_ttl_ticks = 7\n",
        )
        .unwrap();
        assert_eq!(c.chunk_order, ChunkOrder::Lenient);
        assert_eq!(c.max_payload_len, 1024);
        assert_eq!(c.open_session_ttl_ticks, DEFAULT_OPEN_SESSION_TTL_TICKS);
        assert_eq!(c.completed_session_ttl_ticks, 7);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(Config::from_toml_str("bogus = 1").is_err());
    }
}
