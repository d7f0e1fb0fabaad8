//! Instruction frames handed across the C boundary.
//!
//! Layout: version (1 byte) | payload length (4 bytes LE) | bincode payload.
//! Frames are sized before anything is written so callers can check an output
//! buffer first.

use crate::protocol::{HostInstruction, INSTRUCTION_VERSION};

pub const HEADER_LEN: usize = 5;
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024; // 1 MiB

/// Total encoded size of `instr`, header included.
pub fn frame_len(instr: &HostInstruction) -> Result<usize, FrameEncodeError> {
    let payload = bincode::serialized_size(instr)? as usize;
    if payload > MAX_PAYLOAD_LEN {
        return Err(FrameEncodeError::TooLarge { len: payload });
    }
    Ok(HEADER_LEN + payload)
}

/// Encode `instr` into the front of `out`. Returns the frame length; `out` is
/// untouched when it is too short.
pub fn encode_frame_into(instr: &HostInstruction, out: &mut [u8]) -> Result<usize, FrameEncodeError> {
    let need = frame_len(instr)?;
    if out.len() < need {
        return Err(FrameEncodeError::BufferTooSmall {
            need,
            have: out.len(),
        });
    }
    let (header, body) = out[..need].split_at_mut(HEADER_LEN);
    header[0] = INSTRUCTION_VERSION;
    header[1..].copy_from_slice(&((need - HEADER_LEN) as u32).to_le_bytes());
    bincode::serialize_into(body, instr)?;
    Ok(need)
}

/// Encode `instr` into a fresh frame.
pub fn encode_frame(instr: &HostInstruction) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = vec![0u8; frame_len(instr)?];
    encode_frame_into(instr, &mut out)?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("instruction payload of {len} bytes exceeds frame limit")]
    TooLarge { len: usize },
    #[error("output buffer holds {have} bytes, frame needs {need}")]
    BufferTooSmall { need: usize, have: usize },
}

/// Decode one frame from the front of `bytes`. Returns the instruction and the
/// number of bytes consumed. `NeedMore` means the frame is incomplete.
pub fn decode_frame(bytes: &[u8]) -> Result<(HostInstruction, usize), FrameDecodeError> {
    let Some(header) = bytes.get(..HEADER_LEN) else {
        return Err(FrameDecodeError::NeedMore);
    };
    if header[0] != INSTRUCTION_VERSION {
        return Err(FrameDecodeError::VersionMismatch {
            found: header[0],
            expected: INSTRUCTION_VERSION,
        });
    }
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameDecodeError::TooLarge { len });
    }
    let total = HEADER_LEN + len;
    let Some(body) = bytes.get(HEADER_LEN..total) else {
        return Err(FrameDecodeError::NeedMore);
    };
    let instr = bincode::deserialize(body)?;
    Ok((instr, total))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("instruction version {found}, expected {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    #[error("frame payload of {len} bytes exceeds limit")]
    TooLarge { len: usize },
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
