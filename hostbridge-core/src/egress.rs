//! Outbound slot for downloads: one payload at a time, pulled by the host.

use tracing::debug;

use crate::protocol::HostInstruction;

/// The single outbound payload. A new trigger replaces whatever the host has not pulled yet.
#[derive(Debug, Default)]
pub struct OutboundSlot {
    name: String,
    bytes: Vec<u8>,
}

impl OutboundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `name` and build the instruction asking the host to save it.
    pub fn trigger(&mut self, name: &str, bytes: &[u8]) -> HostInstruction {
        if !self.bytes.is_empty() {
            debug!(
                previous = %self.name,
                next = %name,
                "outbound slot overwritten"
            );
        }
        self.name = name.to_owned();
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
        HostInstruction::SaveFile {
            name: self.name.clone(),
            len: self.bytes.len() as u64,
        }
    }

    /// Zero-copy view of the current payload. Only valid until the next trigger.
    pub fn view(&self) -> &[u8] {
        &self.bytes
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
