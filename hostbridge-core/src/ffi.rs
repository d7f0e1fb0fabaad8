//! C ABI for linking hostbridge-core as a static library from C/C++ or JS-glue hosts.
//! Strings are UTF-8 pointer + length. Failures are negative return codes.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::config::Config;
use crate::protocol::{HostInstruction, INSTRUCTION_VERSION};
use crate::session::DecodeId;
use crate::wire::{encode_frame_into, frame_len, FrameEncodeError};
use crate::{TransferError, TransferManager};

pub const HB_ERR_NOT_FOUND: c_int = -1;
pub const HB_ERR_SIZE_MISMATCH: c_int = -2;
pub const HB_ERR_NOT_READY: c_int = -3;
pub const HB_ERR_DECODE_FAILED: c_int = -4;
pub const HB_ERR_INVALID_RANGE: c_int = -5;
pub const HB_ERR_OUT_OF_ORDER: c_int = -6;
pub const HB_ERR_TOO_LARGE: c_int = -7;
pub const HB_ERR_BUSY: c_int = -8;
/// Null handle or pointer, or a string that is not UTF-8.
pub const HB_ERR_INVALID_ARGUMENT: c_int = -100;
/// Output buffer too small for the frame or payload.
pub const HB_ERR_BUFFER_TOO_SMALL: c_int = -101;

fn error_code(e: &TransferError) -> c_int {
    match e {
        TransferError::NotFound => HB_ERR_NOT_FOUND,
        TransferError::SizeMismatch { .. } => HB_ERR_SIZE_MISMATCH,
        TransferError::NotReady => HB_ERR_NOT_READY,
        TransferError::DecodeFailed => HB_ERR_DECODE_FAILED,
        TransferError::InvalidRange { .. } => HB_ERR_INVALID_RANGE,
        TransferError::OutOfOrder { .. } => HB_ERR_OUT_OF_ORDER,
        TransferError::TooLarge { .. } => HB_ERR_TOO_LARGE,
        TransferError::Busy(_) => HB_ERR_BUSY,
    }
}

fn status(r: Result<(), TransferError>) -> c_int {
    match r {
        Ok(()) => 0,
        Err(e) => error_code(&e),
    }
}

/// Sizes travel back as non-negative c_int; anything larger would read as an error code.
fn len_code(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(HB_ERR_TOO_LARGE)
}

fn size_or_code(r: Result<usize, TransferError>) -> c_int {
    match r {
        Ok(n) => len_code(n),
        Err(e) => error_code(&e),
    }
}

/// Chunk offsets arrive as u64 and must fit the target's usize.
fn range_arg(start: u64, end: u64) -> Option<(usize, usize)> {
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

/// # Safety
/// `ptr` must be valid for `len` bytes when `len > 0`.
unsafe fn bytes_arg<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(slice::from_raw_parts(ptr, len))
}

/// # Safety
/// As for `bytes_arg`.
unsafe fn str_arg<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    bytes_arg(ptr, len).and_then(|b| std::str::from_utf8(b).ok())
}

/// # Safety
/// `h` must be null or a handle from `hb_create`.
unsafe fn manager<'a>(h: *mut c_void) -> Option<&'a mut TransferManager> {
    (h as *mut TransferManager).as_mut()
}

/// Check that the frame for `instr` fits out_buf. Called before the manager is
/// touched, so a too-small buffer leaves no state behind and the call can be retried.
fn check_frame_fits(instr: &HostInstruction, out_buf: *mut u8, out_buf_len: usize) -> Result<(), c_int> {
    match frame_len(instr) {
        Ok(n) if !out_buf.is_null() && n <= out_buf_len => Ok(()),
        Ok(_) => Err(HB_ERR_BUFFER_TOO_SMALL),
        Err(_) => Err(HB_ERR_INVALID_ARGUMENT),
    }
}

/// Write one instruction frame to out_buf. Returns bytes written or a negative code.
fn write_frame(instr: &HostInstruction, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() {
        return HB_ERR_BUFFER_TOO_SMALL;
    }
    let out = unsafe { slice::from_raw_parts_mut(out_buf, out_buf_len) };
    match encode_frame_into(instr, out) {
        Ok(n) => len_code(n),
        Err(FrameEncodeError::BufferTooSmall { .. }) => HB_ERR_BUFFER_TOO_SMALL,
        Err(_) => HB_ERR_INVALID_ARGUMENT,
    }
}

/// Returns the instruction format version. Used so the staticlib exports a C symbol and is linkable.
#[no_mangle]
pub extern "C" fn hb_version() -> u8 {
    INSTRUCTION_VERSION
}

/// Create a manager with default config. Returns opaque handle.
#[no_mangle]
pub extern "C" fn hb_create() -> *mut c_void {
    Box::into_raw(Box::new(TransferManager::new())) as *mut c_void
}

/// Create a manager from TOML config text. Returns null if the text does not parse or
/// `max_payload_len` does not fit the c_int sizes this interface returns.
#[no_mangle]
pub extern "C" fn hb_create_with_config(toml: *const u8, toml_len: usize) -> *mut c_void {
    let Some(text) = (unsafe { str_arg(toml, toml_len) }) else {
        return std::ptr::null_mut();
    };
    match Config::from_toml_str(text) {
        Ok(config) if c_int::try_from(config.max_payload_len).is_ok() => {
            Box::into_raw(Box::new(TransferManager::with_config(config))) as *mut c_void
        }
        _ => std::ptr::null_mut(),
    }
}

/// Destroy manager and every session it holds. No-op if h is null.
#[no_mangle]
pub extern "C" fn hb_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut TransferManager) };
}

/// Advance the clock and reap idle sessions. Returns the number reaped.
#[no_mangle]
pub extern "C" fn hb_tick(h: *mut c_void) -> c_int {
    match unsafe { manager(h) } {
        Some(m) => len_code(m.tick().len()),
        None => HB_ERR_INVALID_ARGUMENT,
    }
}

/// Ensure a listener for `key`. Writes an InstallUploadListener frame to out_buf the first
/// time a key is seen. Returns bytes written, 0 if already installed, or a negative code.
/// The key is only recorded once its frame has been written.
#[no_mangle]
pub extern "C" fn hb_upload_start(
    h: *mut c_void,
    key: *const u8,
    key_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (Some(m), Some(key)) = (unsafe { manager(h) }, unsafe { str_arg(key, key_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if m.is_listener_installed(key) {
        return 0;
    }
    let pending = HostInstruction::InstallUploadListener {
        key: key.to_owned(),
    };
    if let Err(code) = check_frame_fits(&pending, out_buf, out_buf_len) {
        return code;
    }
    match m.upload_start(key) {
        Some(instr) => write_frame(&instr, out_buf, out_buf_len),
        None => 0,
    }
}

/// Host side: write data[..end - start] at `start` of the upload for `key`. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_write_chunk(
    h: *mut c_void,
    key: *const u8,
    key_len: usize,
    data: *const u8,
    data_len: usize,
    start: u64,
    end: u64,
) -> c_int {
    let (Some(m), Some(key), Some(data)) = (
        unsafe { manager(h) },
        unsafe { str_arg(key, key_len) },
        unsafe { bytes_arg(data, data_len) },
    ) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    let Some((start, end)) = range_arg(start, end) else {
        return HB_ERR_INVALID_RANGE;
    };
    status(m.upload_write_chunk(key, data, start, end))
}

/// Host side: upload for `key` complete with the given file name. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_finish(
    h: *mut c_void,
    key: *const u8,
    key_len: usize,
    name: *const u8,
    name_len: usize,
) -> c_int {
    let (Some(m), Some(key), Some(name)) = (
        unsafe { manager(h) },
        unsafe { str_arg(key, key_len) },
        unsafe { str_arg(name, name_len) },
    ) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    status(m.upload_finish(key, name))
}

/// Payload size of the first upload for `key` (finished or not), or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_result_size(h: *mut c_void, key: *const u8, key_len: usize) -> c_int {
    let (Some(m), Some(key)) = (unsafe { manager(h) }, unsafe { str_arg(key, key_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    size_or_code(m.upload_result_size(key))
}

/// File name length + 1 for the first upload for `key`, or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_filename_size(h: *mut c_void, key: *const u8, key_len: usize) -> c_int {
    let (Some(m), Some(key)) = (unsafe { manager(h) }, unsafe { str_arg(key, key_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    size_or_code(m.upload_filename_size(key))
}

/// Copy the upload payload into out_buf; `len` must equal the stored size. Destroys the
/// session on success. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_get_data(
    h: *mut c_void,
    key: *const u8,
    key_len: usize,
    out_buf: *mut u8,
    len: usize,
) -> c_int {
    let (Some(m), Some(key)) = (unsafe { manager(h) }, unsafe { str_arg(key, key_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if out_buf.is_null() && len > 0 {
        return HB_ERR_INVALID_ARGUMENT;
    }
    match m.upload_take_data(key, len) {
        Ok(data) => {
            if !data.is_empty() {
                unsafe {
                    out_buf.copy_from_nonoverlapping(data.as_ptr(), data.len());
                }
            }
            0
        }
        Err(e) => error_code(&e),
    }
}

/// Copy the NUL-terminated file name into out_buf; `len` must equal name length + 1.
/// Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_upload_get_filename(
    h: *mut c_void,
    key: *const u8,
    key_len: usize,
    out_buf: *mut u8,
    len: usize,
) -> c_int {
    let (Some(m), Some(key)) = (unsafe { manager(h) }, unsafe { str_arg(key, key_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if out_buf.is_null() {
        return HB_ERR_INVALID_ARGUMENT;
    }
    match m.upload_filename(key, len) {
        Ok(name) => {
            unsafe {
                out_buf.copy_from_nonoverlapping(name.as_ptr(), name.len());
            }
            0
        }
        Err(e) => error_code(&e),
    }
}

/// Queue encoded image bytes for decoding. Fills out_id and writes a DecodeImage frame to
/// out_buf. Returns bytes written or a negative code; on failure nothing is queued.
#[no_mangle]
pub extern "C" fn hb_decode_start(
    h: *mut c_void,
    data: *const u8,
    data_len: usize,
    out_id: *mut u32,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (Some(m), Some(data)) = (unsafe { manager(h) }, unsafe { bytes_arg(data, data_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if out_id.is_null() {
        return HB_ERR_INVALID_ARGUMENT;
    }
    let pending = HostInstruction::DecodeImage {
        id: m.next_decode_id(),
        input_len: data.len() as u64,
    };
    if let Err(code) = check_frame_fits(&pending, out_buf, out_buf_len) {
        return code;
    }
    match m.decode_enqueue(data.to_vec()) {
        Ok((id, instr)) => {
            unsafe {
                *out_id = id.0;
            }
            write_frame(&instr, out_buf, out_buf_len)
        }
        Err(e) => error_code(&e),
    }
}

/// Zero-copy view of the input for a pending decode. The view stays valid until the
/// decode finishes. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_decode_input(
    h: *mut c_void,
    id: u32,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> c_int {
    let Some(m) = (unsafe { manager(h) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if out_ptr.is_null() || out_len.is_null() {
        return HB_ERR_INVALID_ARGUMENT;
    }
    match m.decode_input(DecodeId(id)) {
        Some(input) => {
            unsafe {
                *out_ptr = input.as_ptr();
                *out_len = input.len();
            }
            0
        }
        None => HB_ERR_NOT_FOUND,
    }
}

/// Host side: write decoded pixels data[..end - start] at `start`. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_decode_write_chunk(
    h: *mut c_void,
    id: u32,
    data: *const u8,
    data_len: usize,
    start: u64,
    end: u64,
) -> c_int {
    let (Some(m), Some(data)) = (unsafe { manager(h) }, unsafe { bytes_arg(data, data_len) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    let Some((start, end)) = range_arg(start, end) else {
        return HB_ERR_INVALID_RANGE;
    };
    status(m.decode_write_chunk(DecodeId(id), data, start, end))
}

/// Host side: decoding finished. Pass width = height = -1 when the host could not decode.
#[no_mangle]
pub extern "C" fn hb_decode_finish(h: *mut c_void, id: u32, width: c_int, height: c_int) -> c_int {
    let Some(m) = (unsafe { manager(h) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    status(m.decode_finish(DecodeId(id), width, height))
}

/// Pixel buffer size once the decode has finished, else a negative code.
#[no_mangle]
pub extern "C" fn hb_decode_result_size(h: *mut c_void, id: u32) -> c_int {
    let Some(m) = (unsafe { manager(h) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    size_or_code(m.decode_result_size(DecodeId(id)))
}

/// Copy up to `size` pixel bytes into out_buf and the dimensions into out_width/out_height
/// (-1/-1 when the host failed). Destroys the session. Returns bytes copied or a negative code.
#[no_mangle]
pub extern "C" fn hb_decode_get_result(
    h: *mut c_void,
    id: u32,
    out_buf: *mut u8,
    size: usize,
    out_width: *mut c_int,
    out_height: *mut c_int,
) -> c_int {
    let Some(m) = (unsafe { manager(h) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if (out_buf.is_null() && size > 0) || out_width.is_null() || out_height.is_null() {
        return HB_ERR_INVALID_ARGUMENT;
    }
    match m.decode_take_result(DecodeId(id), size) {
        Ok(result) => {
            unsafe {
                if !result.pixels.is_empty() {
                    out_buf.copy_from_nonoverlapping(result.pixels.as_ptr(), result.pixels.len());
                }
                *out_width = result.width;
                *out_height = result.height;
            }
            len_code(result.pixels.len())
        }
        Err(e) => error_code(&e),
    }
}

/// Store a payload for the host to save as `name`; writes a SaveFile frame to out_buf.
/// Returns bytes written or a negative code.
#[no_mangle]
pub extern "C" fn hb_download_trigger(
    h: *mut c_void,
    name: *const u8,
    name_len: usize,
    data: *const u8,
    data_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (Some(m), Some(name), Some(data)) = (
        unsafe { manager(h) },
        unsafe { str_arg(name, name_len) },
        unsafe { bytes_arg(data, data_len) },
    ) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    let pending = HostInstruction::SaveFile {
        name: name.to_owned(),
        len: data.len() as u64,
    };
    if let Err(code) = check_frame_fits(&pending, out_buf, out_buf_len) {
        return code;
    }
    let instr = m.download_trigger(name, data);
    write_frame(&instr, out_buf, out_buf_len)
}

/// Zero-copy view of the outbound payload, valid until the next trigger. Returns 0 or a negative code.
#[no_mangle]
pub extern "C" fn hb_download_view(
    h: *mut c_void,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> c_int {
    let Some(m) = (unsafe { manager(h) }) else {
        return HB_ERR_INVALID_ARGUMENT;
    };
    if out_ptr.is_null() || out_len.is_null() {
        return HB_ERR_INVALID_ARGUMENT;
    }
    let view = m.outbound_view();
    unsafe {
        *out_ptr = view.as_ptr();
        *out_len = view.len();
    }
    0
}
