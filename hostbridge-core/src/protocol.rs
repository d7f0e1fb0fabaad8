//! Instructions the native side hands to the host runtime.

use serde::{Deserialize, Serialize};

use crate::session::DecodeId;

/// Current instruction format version, the first byte of every frame. `decode_frame`
/// rejects frames carrying any other value.
pub const INSTRUCTION_VERSION: u8 = 1;

/// Work the host must carry out on the native side's behalf. Encoding is bincode;
/// framing is version + length prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostInstruction {
    /// Attach a listener to the input element `key`. On every file selection the
    /// host reads the file, writes it as upload chunks, then finishes with the file name.
    InstallUploadListener { key: String },
    /// Fetch the input for `id`, decode it to RGBA pixels, write them as decode
    /// chunks, then finish with the dimensions (or (-1, -1) on failure).
    DecodeImage { id: DecodeId, input_len: u64 },
    /// Read the outbound view and save it as `name`.
    SaveFile { name: String, len: u64 },
}
