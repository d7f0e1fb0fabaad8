//! Cross-boundary transfer session manager.
//! Host-driven: no I/O; the native side and the host call in, the core returns instructions for the host.

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod core;
pub mod egress;
pub mod ffi;
pub mod ingest;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod wire;

pub use config::{ChunkOrder, Config, ConfigError};
pub use core::{DecodeResult, DecodedImage, TransferError, TransferManager, UploadedFile};
pub use protocol::{HostInstruction, INSTRUCTION_VERSION};
pub use session::{DecodeId, Identity};
pub use wire::{
    decode_frame, encode_frame, encode_frame_into, frame_len, FrameDecodeError, FrameEncodeError,
};
