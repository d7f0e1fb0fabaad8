//! Host-driven API: TransferManager receives calls from both sides, returns instructions for the host.
//!
//! The native side starts uploads, enqueues decodes, polls sizes and pulls results;
//! the host writes chunks and marks completion. Nothing here blocks or does I/O.

use tracing::{debug, warn};

use crate::config::Config;
use crate::egress::OutboundSlot;
use crate::ingest::{self, ConsumePolicy};
use crate::protocol::HostInstruction;
use crate::registry::HandlerRegistry;
use crate::session::{DecodeId, Identity, Metadata, SessionTable};

/// Owns every session, the listener registry and the outbound slot.
/// Hosts that touch it from several threads wrap it in a mutex.
pub struct TransferManager {
    config: Config,
    sessions: SessionTable,
    handlers: HandlerRegistry,
    outbound: OutboundSlot,
    next_decode_id: u32,
    tick_count: u64,
}

/// A completed upload pulled out of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Raw decode result as stored: dimensions may be the (-1, -1) failure sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u8>,
}

impl DecodeResult {
    pub fn is_failed(&self) -> bool {
        Metadata::Image {
            width: self.width,
            height: self.height,
        }
        .is_decode_failure()
    }
}

/// A successfully decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            sessions: SessionTable::new(),
            handlers: HandlerRegistry::new(),
            outbound: OutboundSlot::new(),
            next_decode_id: 0,
            tick_count: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sessions currently held, open or completed.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_listener_installed(&self, key: &str) -> bool {
        self.handlers.is_installed(key)
    }

    // ---- upload ----

    /// Make sure the host listens on `key`. Returns the install instruction the
    /// first time a key is seen, `None` afterwards. No session is created here.
    pub fn upload_start(&mut self, key: &str) -> Option<HostInstruction> {
        if !self.handlers.ensure_installed(key) {
            return None;
        }
        debug!(%key, "upload listener requested");
        Some(HostInstruction::InstallUploadListener {
            key: key.to_owned(),
        })
    }

    /// Host side: write `bytes[..end - start]` at `start` of the open upload for `key`,
    /// starting a new session if none is open.
    pub fn upload_write_chunk(
        &mut self,
        key: &str,
        bytes: &[u8],
        start: usize,
        end: usize,
    ) -> Result<(), TransferError> {
        let identity = Identity::key(key);
        ingest::write_chunk(
            &mut self.sessions,
            &identity,
            bytes,
            start,
            end,
            true,
            &self.config,
            self.tick_count,
        )
        .inspect_err(|e| warn!(%identity, start, end, error = %e, "upload chunk rejected"))
    }

    /// Host side: the file for `key` is complete.
    pub fn upload_finish(&mut self, key: &str, file_name: &str) -> Result<(), TransferError> {
        let identity = Identity::key(key);
        ingest::mark_done(
            &mut self.sessions,
            &identity,
            Metadata::FileName(file_name.to_owned()),
            true,
            self.tick_count,
        )?;
        debug!(%identity, %file_name, "upload finished");
        Ok(())
    }

    /// Current payload size of the first upload for `key`, finished or not.
    pub fn upload_result_size(&self, key: &str) -> Result<usize, TransferError> {
        ingest::query_size(&self.sessions, &Identity::key(key), false)
    }

    /// File name length + 1 for the first upload for `key`.
    pub fn upload_filename_size(&self, key: &str) -> Result<usize, TransferError> {
        ingest::query_metadata_size(&self.sessions, &Identity::key(key))
    }

    /// Pull the payload of the first upload for `key`. `expected` must match the
    /// stored size exactly; on success the session is destroyed.
    pub fn upload_take_data(&mut self, key: &str, expected: usize) -> Result<Vec<u8>, TransferError> {
        let identity = Identity::key(key);
        let consumed = ingest::consume(
            &mut self.sessions,
            &identity,
            expected,
            ConsumePolicy::Exact,
            false,
        )?;
        debug!(%identity, len = consumed.bytes.len(), "upload consumed");
        Ok(consumed.bytes)
    }

    /// NUL-terminated file name of the first upload for `key`. Repeatable.
    pub fn upload_filename(&self, key: &str, expected: usize) -> Result<Vec<u8>, TransferError> {
        ingest::consume_metadata(&self.sessions, &Identity::key(key), expected)
    }

    /// Poll-and-pull for Rust callers: `NotReady` while the file is still arriving.
    pub fn take_upload(&mut self, key: &str) -> Result<UploadedFile, TransferError> {
        let identity = Identity::key(key);
        let session = self
            .sessions
            .first(&identity)
            .ok_or(TransferError::NotFound)?;
        if !session.is_done() {
            return Err(TransferError::NotReady);
        }
        let size = session.buffer().len();
        let consumed = ingest::consume(
            &mut self.sessions,
            &identity,
            size,
            ConsumePolicy::Exact,
            true,
        )?;
        let file_name = match consumed.metadata {
            Metadata::FileName(name) => name,
            _ => String::new(),
        };
        Ok(UploadedFile {
            file_name,
            data: consumed.bytes,
        })
    }

    // ---- decode ----

    /// Queue `input` (an encoded image) for the host to decode. Returns the new id
    /// and the instruction to pass to the host.
    pub fn decode_enqueue(
        &mut self,
        input: Vec<u8>,
    ) -> Result<(DecodeId, HostInstruction), TransferError> {
        let id = DecodeId(self.next_decode_id);
        let input_len = input.len() as u64;
        ingest::enqueue(
            &mut self.sessions,
            Identity::Decode(id),
            input,
            self.tick_count,
        )?;
        self.next_decode_id = self.next_decode_id.wrapping_add(1);
        debug!(%id, input_len, "decode enqueued");
        Ok((id, HostInstruction::DecodeImage { id, input_len }))
    }

    /// Id the next `decode_enqueue` will assign.
    pub fn next_decode_id(&self) -> DecodeId {
        DecodeId(self.next_decode_id)
    }

    /// Zero-copy view of the input for a pending decode.
    pub fn decode_input(&self, id: DecodeId) -> Option<&[u8]> {
        self.sessions
            .open_session(&Identity::Decode(id))
            .map(|s| s.input())
    }

    /// Input of the most recently enqueued decode that is still pending. Only
    /// meaningful for hosts that run one decode at a time.
    pub fn latest_decode_input(&self) -> Option<(DecodeId, &[u8])> {
        self.sessions
            .last_open_where(|id| matches!(id, Identity::Decode(_)))
            .and_then(|s| match s.identity() {
                Identity::Decode(id) => Some((*id, s.input())),
                Identity::Key(_) => None,
            })
    }

    /// Host side: write decoded pixels for `id`.
    pub fn decode_write_chunk(
        &mut self,
        id: DecodeId,
        bytes: &[u8],
        start: usize,
        end: usize,
    ) -> Result<(), TransferError> {
        let identity = Identity::Decode(id);
        ingest::write_chunk(
            &mut self.sessions,
            &identity,
            bytes,
            start,
            end,
            false,
            &self.config,
            self.tick_count,
        )
        .inspect_err(|e| warn!(%identity, start, end, error = %e, "decode chunk rejected"))
    }

    /// Host side: decoding of `id` finished. (-1, -1) reports a decode failure.
    pub fn decode_finish(&mut self, id: DecodeId, width: i32, height: i32) -> Result<(), TransferError> {
        let identity = Identity::Decode(id);
        ingest::mark_done(
            &mut self.sessions,
            &identity,
            Metadata::Image { width, height },
            false,
            self.tick_count,
        )
        .inspect_err(|_| warn!(%identity, "decode finished for unknown id"))?;
        debug!(%identity, width, height, "decode finished");
        Ok(())
    }

    /// Pixel buffer size for `id`; `NotFound` until the host has finished it.
    pub fn decode_result_size(&self, id: DecodeId) -> Result<usize, TransferError> {
        ingest::query_size(&self.sessions, &Identity::Decode(id), true)
    }

    /// Pull up to `requested` pixel bytes plus the stored dimensions. The caller
    /// must check `is_failed()`. On success the session is destroyed.
    pub fn decode_take_result(
        &mut self,
        id: DecodeId,
        requested: usize,
    ) -> Result<DecodeResult, TransferError> {
        let consumed = ingest::consume(
            &mut self.sessions,
            &Identity::Decode(id),
            requested,
            ConsumePolicy::Truncate,
            true,
        )?;
        let (width, height) = match consumed.metadata {
            Metadata::Image { width, height } => (width, height),
            _ => (-1, -1),
        };
        Ok(DecodeResult {
            width,
            height,
            pixels: consumed.bytes,
        })
    }

    /// Poll-and-pull for Rust callers. A finished decode is destroyed even when it
    /// turns out to have failed.
    pub fn take_decoded(&mut self, id: DecodeId) -> Result<DecodedImage, TransferError> {
        let identity = Identity::Decode(id);
        let session = self
            .sessions
            .first(&identity)
            .ok_or(TransferError::NotFound)?;
        if !session.is_done() {
            return Err(TransferError::NotReady);
        }
        let size = session.buffer().len();
        let result = self.decode_take_result(id, size)?;
        if result.is_failed() || result.width <= 0 || result.height <= 0 || result.pixels.is_empty()
        {
            warn!(%identity, width = result.width, height = result.height, "decode failed");
            return Err(TransferError::DecodeFailed);
        }
        Ok(DecodedImage {
            width: result.width as u32,
            height: result.height as u32,
            pixels: result.pixels,
        })
    }

    // ---- download ----

    /// Store `bytes` for the host to save as `name`. Replaces anything not yet pulled.
    pub fn download_trigger(&mut self, name: &str, bytes: &[u8]) -> HostInstruction {
        self.outbound.trigger(name, bytes)
    }

    /// Zero-copy view of the outbound payload.
    pub fn outbound_view(&self) -> &[u8] {
        self.outbound.view()
    }

    pub fn outbound_name(&self) -> &str {
        self.outbound.name()
    }

    // ---- housekeeping ----

    /// Advance the logical clock and reap idle sessions. Returns the identities dropped.
    pub fn tick(&mut self) -> Vec<Identity> {
        self.tick_count = self.tick_count.saturating_add(1);
        let reaped = self.sessions.reap(
            self.tick_count,
            self.config.open_session_ttl_ticks,
            self.config.completed_session_ttl_ticks,
        );
        for identity in &reaped {
            warn!(%identity, tick = self.tick_count, "reaped idle session");
        }
        reaped
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("no such transfer")]
    NotFound,
    #[error("size mismatch: requested {expected}, stored {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("transfer not finished")]
    NotReady,
    #[error("host could not decode image")]
    DecodeFailed,
    #[error("invalid chunk range [{start}, {end}) with {len} bytes")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error("chunk at {start} arrived before offset {expected}")]
    OutOfOrder { start: usize, expected: usize },
    #[error("chunk end {end} exceeds payload limit {limit}")]
    TooLarge { end: usize, limit: usize },
    #[error("transfer {0} already open")]
    Busy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkOrder;

    fn upload_ten(m: &mut TransferManager, key: &str) -> Vec<u8> {
        let data: Vec<u8> = (0..10).collect();
        m.upload_write_chunk(key, &data[0..4], 0, 4).unwrap();
        m.upload_write_chunk(key, &data[4..10], 4, 10).unwrap();
        m.upload_finish(key, "ten.bin").unwrap();
        data
    }

    #[test]
    fn never_started_identities_are_not_found() {
        let mut m = TransferManager::new();
        assert_eq!(m.upload_result_size("x"), Err(TransferError::NotFound));
        assert_eq!(m.upload_filename_size("x"), Err(TransferError::NotFound));
        assert_eq!(m.upload_take_data("x", 0), Err(TransferError::NotFound));
        assert_eq!(m.upload_filename("x", 1), Err(TransferError::NotFound));
        assert_eq!(m.take_upload("x"), Err(TransferError::NotFound));
        let id = DecodeId(42);
        assert_eq!(m.decode_result_size(id), Err(TransferError::NotFound));
        assert_eq!(m.decode_take_result(id, 10), Err(TransferError::NotFound));
        assert_eq!(m.decode_write_chunk(id, &[0], 0, 1), Err(TransferError::NotFound));
        assert_eq!(m.decode_finish(id, 1, 1), Err(TransferError::NotFound));
        assert_eq!(m.take_decoded(id), Err(TransferError::NotFound));
        assert!(m.decode_input(id).is_none());
    }

    #[test]
    fn upload_chunks_then_take_exact() {
        let mut m = TransferManager::new();
        let data = upload_ten(&mut m, "state");
        assert_eq!(m.upload_result_size("state"), Ok(10));
        assert_eq!(m.upload_take_data("state", 10), Ok(data));
        assert_eq!(m.upload_take_data("state", 10), Err(TransferError::NotFound));
        assert_eq!(m.session_count(), 0);
    }

    #[test]
    fn upload_size_mismatch_keeps_session() {
        let mut m = TransferManager::new();
        let data = upload_ten(&mut m, "state");
        assert_eq!(
            m.upload_take_data("state", 9),
            Err(TransferError::SizeMismatch {
                expected: 9,
                actual: 10
            })
        );
        assert_eq!(m.upload_take_data("state", 10), Ok(data));
    }

    #[test]
    fn upload_size_visible_while_accumulating() {
        let mut m = TransferManager::new();
        m.upload_write_chunk("state", &[1, 2, 3, 4], 0, 4).unwrap();
        assert_eq!(m.upload_result_size("state"), Ok(4));
        assert_eq!(m.take_upload("state"), Err(TransferError::NotReady));
    }

    #[test]
    fn upload_metadata_then_data() {
        let mut m = TransferManager::new();
        upload_ten(&mut m, "state");
        let n = m.upload_filename_size("state").unwrap();
        assert_eq!(n, "ten.bin".len() + 1);
        assert_eq!(m.upload_filename("state", n).unwrap(), b"ten.bin\0".to_vec());
        assert_eq!(m.upload_filename("state", n).unwrap(), b"ten.bin\0".to_vec());
        assert!(m.upload_take_data("state", 10).is_ok());
        assert_eq!(m.upload_filename("state", n), Err(TransferError::NotFound));
    }

    #[test]
    fn take_upload_returns_name_and_bytes() {
        let mut m = TransferManager::new();
        let data = upload_ten(&mut m, "state");
        let file = m.take_upload("state").unwrap();
        assert_eq!(file.file_name, "ten.bin");
        assert_eq!(file.data, data);
    }

    #[test]
    fn second_upload_on_same_key_queues_behind_first() {
        let mut m = TransferManager::new();
        upload_ten(&mut m, "state");
        m.upload_write_chunk("state", &[7, 7], 0, 2).unwrap();
        m.upload_finish("state", "two.bin").unwrap();
        assert_eq!(m.take_upload("state").unwrap().file_name, "ten.bin");
        assert_eq!(m.take_upload("state").unwrap().data, vec![7, 7]);
    }

    #[test]
    fn restart_mid_transfer_is_refused() {
        let mut m = TransferManager::new();
        m.upload_write_chunk("state", &[1, 2, 3, 4], 0, 4).unwrap();
        // a second file on the same key starting over at 0
        assert_eq!(
            m.upload_write_chunk("state", &[9, 9], 0, 2),
            Err(TransferError::OutOfOrder {
                start: 0,
                expected: 4
            })
        );
        m.upload_write_chunk("state", &[5], 4, 5).unwrap();
        m.upload_finish("state", "f").unwrap();
        assert_eq!(m.take_upload("state").unwrap().data, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn lenient_order_accepts_overlap() {
        let mut m = TransferManager::with_config(Config {
            chunk_order: ChunkOrder::Lenient,
            ..Config::default()
        });
        m.upload_write_chunk("state", &[1, 1, 1, 1], 0, 4).unwrap();
        m.upload_write_chunk("state", &[2, 2], 1, 3).unwrap();
        m.upload_finish("state", "f").unwrap();
        assert_eq!(m.take_upload("state").unwrap().data, vec![1, 2, 2, 1]);
    }

    #[test]
    fn listener_instruction_emitted_once() {
        let mut m = TransferManager::new();
        assert_eq!(
            m.upload_start("state"),
            Some(HostInstruction::InstallUploadListener {
                key: "state".into()
            })
        );
        assert_eq!(m.upload_start("state"), None);
        assert!(m.upload_start("other").is_some());
        assert!(m.is_listener_installed("state"));
        // starting creates no session
        assert_eq!(m.session_count(), 0);
    }

    #[test]
    fn decode_ids_count_up_from_zero() {
        let mut m = TransferManager::new();
        let (a, instr) = m.decode_enqueue(vec![1, 2, 3]).unwrap();
        let (b, _) = m.decode_enqueue(vec![4]).unwrap();
        assert_eq!(a, DecodeId(0));
        assert_eq!(b, DecodeId(1));
        assert_eq!(
            instr,
            HostInstruction::DecodeImage {
                id: a,
                input_len: 3
            }
        );
        assert_eq!(m.decode_input(a), Some(&[1u8, 2, 3][..]));
        assert_eq!(m.latest_decode_input(), Some((b, &[4u8][..])));
    }

    #[test]
    fn decode_size_hidden_until_done() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0xff]).unwrap();
        let pixels = vec![3u8; 64 * 64 * 4];
        for r in crate::chunk::split_into_chunks(pixels.len(), 4096) {
            m.decode_write_chunk(id, &pixels[r.start..r.end], r.start, r.end)
                .unwrap();
        }
        assert_eq!(m.decode_result_size(id), Err(TransferError::NotFound));
        assert_eq!(m.take_decoded(id), Err(TransferError::NotReady));
        m.decode_finish(id, 64, 64).unwrap();
        assert_eq!(m.decode_result_size(id), Ok(64 * 64 * 4));
        assert!(m.decode_input(id).is_none());
        let img = m.take_decoded(id).unwrap();
        assert_eq!((img.width, img.height), (64, 64));
        assert_eq!(img.pixels, pixels);
    }

    #[test]
    fn decode_failure_sentinel_detectable() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0]).unwrap();
        m.decode_write_chunk(id, &[1, 2], 0, 2).unwrap();
        m.decode_finish(id, -1, -1).unwrap();
        let result = m.decode_take_result(id, 2).unwrap();
        assert!(result.is_failed());
        assert_eq!((result.width, result.height), (-1, -1));
    }

    #[test]
    fn take_decoded_reports_failure_and_destroys() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0]).unwrap();
        m.decode_finish(id, -1, -1).unwrap();
        assert_eq!(m.take_decoded(id), Err(TransferError::DecodeFailed));
        assert_eq!(m.take_decoded(id), Err(TransferError::NotFound));
    }

    #[test]
    fn decode_take_truncates() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0]).unwrap();
        let pixels: Vec<u8> = (0..10).collect();
        m.decode_write_chunk(id, &pixels, 0, 10).unwrap();
        m.decode_finish(id, 1, 1).unwrap();
        let result = m.decode_take_result(id, 5).unwrap();
        assert_eq!(result.pixels, vec![0, 1, 2, 3, 4]);
        assert_eq!(m.decode_take_result(id, 5), Err(TransferError::NotFound));
    }

    #[test]
    fn decode_take_larger_request_returns_all() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0]).unwrap();
        m.decode_write_chunk(id, &[1, 2, 3], 0, 3).unwrap();
        m.decode_finish(id, 1, 1).unwrap();
        assert_eq!(m.decode_take_result(id, 100).unwrap().pixels, vec![1, 2, 3]);
    }

    #[test]
    fn decode_chunk_after_finish_rejected() {
        let mut m = TransferManager::new();
        let (id, _) = m.decode_enqueue(vec![0]).unwrap();
        m.decode_finish(id, 1, 1).unwrap();
        assert_eq!(m.decode_write_chunk(id, &[1], 0, 1), Err(TransferError::NotFound));
        assert_eq!(m.decode_finish(id, 1, 1), Err(TransferError::NotFound));
    }

    #[test]
    fn download_second_trigger_wins() {
        let mut m = TransferManager::new();
        m.download_trigger("a.bin", &[1, 2, 3]);
        let instr = m.download_trigger("b.bin", &[4, 5]);
        assert_eq!(
            instr,
            HostInstruction::SaveFile {
                name: "b.bin".into(),
                len: 2
            }
        );
        assert_eq!(m.outbound_view(), &[4, 5]);
        assert_eq!(m.outbound_name(), "b.bin");
    }

    #[test]
    fn tick_reaps_abandoned_upload() {
        let mut m = TransferManager::with_config(Config {
            open_session_ttl_ticks: 2,
            ..Config::default()
        });
        m.upload_write_chunk("state", &[1], 0, 1).unwrap();
        let (id, _) = m.decode_enqueue(vec![1]).unwrap();
        assert!(m.tick().is_empty());
        assert!(m.tick().is_empty());
        let reaped = m.tick();
        assert_eq!(reaped.len(), 2);
        assert!(reaped.contains(&Identity::key("state")));
        assert!(reaped.contains(&Identity::Decode(id)));
        assert_eq!(m.upload_result_size("state"), Err(TransferError::NotFound));
    }

    #[test]
    fn activity_postpones_reaping() {
        let mut m = TransferManager::with_config(Config {
            open_session_ttl_ticks: 2,
            ..Config::default()
        });
        m.upload_write_chunk("state", &[1], 0, 1).unwrap();
        m.tick();
        m.tick();
        m.upload_write_chunk("state", &[2], 1, 2).unwrap();
        assert!(m.tick().is_empty());
        assert_eq!(m.upload_result_size("state"), Ok(2));
    }

    #[test]
    fn payload_limit_applies() {
        let mut m = TransferManager::with_config(Config {
            max_payload_len: 8,
            ..Config::default()
        });
        assert_eq!(
            m.upload_write_chunk("state", &[0; 9], 0, 9),
            Err(TransferError::TooLarge { end: 9, limit: 8 })
        );
        assert_eq!(m.session_count(), 0);
    }
}
