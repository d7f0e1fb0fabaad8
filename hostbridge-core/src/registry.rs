//! Keys that already have a host-side upload listener installed.

use std::collections::HashSet;

/// Idempotency guard for listener installation. Entries are never removed.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    installed: HashSet<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`. Returns true only the first time a key is seen, i.e. when
    /// the caller must ask the host to install the listener.
    pub fn ensure_installed(&mut self, key: &str) -> bool {
        if self.installed.contains(key) {
            return false;
        }
        self.installed.insert(key.to_owned())
    }

    pub fn is_installed(&self, key: &str) -> bool {
        self.installed.contains(key)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}
