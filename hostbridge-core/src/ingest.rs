//! Ingest state machine shared by uploads and image decodes.
//!
//! Per identity: no session -> accumulating -> done -> consumed (session destroyed).
//! The host writes chunks and marks completion; the native side polls sizes
//! and pulls the payload out exactly once.

use crate::chunk;
use crate::config::Config;
use crate::core::TransferError;
use crate::session::{Identity, Metadata, SessionTable, TransferSession};

/// How a consume request's size is matched against the stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumePolicy {
    /// Requested size must equal the payload size; mismatch leaves the session intact.
    Exact,
    /// Return at most the requested number of bytes.
    Truncate,
}

/// Payload and metadata moved out of a destroyed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub bytes: Vec<u8>,
    pub metadata: Metadata,
}

/// Append a session that already carries the host's input (decode requests).
pub fn enqueue(
    table: &mut SessionTable,
    identity: Identity,
    input: Vec<u8>,
    tick: u64,
) -> Result<(), TransferError> {
    table
        .append(TransferSession::with_input(identity, input, tick))
        .map_err(|rejected| TransferError::Busy(rejected.identity().to_string()))
}

/// Write one chunk into the open session for `identity`. With `create` set, a
/// missing session is started; otherwise the write fails with `NotFound`.
/// Nothing is created when the range is rejected.
#[allow(clippy::too_many_arguments)]
pub fn write_chunk(
    table: &mut SessionTable,
    identity: &Identity,
    bytes: &[u8],
    start: usize,
    end: usize,
    create: bool,
    config: &Config,
    tick: u64,
) -> Result<(), TransferError> {
    let next_offset = match table.open_session(identity) {
        Some(s) => s.next_offset(),
        None if create => 0,
        None => return Err(TransferError::NotFound),
    };
    let range = chunk::check_chunk(
        start,
        end,
        bytes.len(),
        next_offset,
        config.chunk_order,
        config.max_payload_len,
    )?;
    let session = table.open_or_append(identity, tick);
    session.write_chunk(range.start, &bytes[..range.len()], tick);
    Ok(())
}

/// Mark the open session for `identity` done. With `create` set, a producer that
/// never wrote a chunk still yields an empty completed session.
pub fn mark_done(
    table: &mut SessionTable,
    identity: &Identity,
    metadata: Metadata,
    create: bool,
    tick: u64,
) -> Result<(), TransferError> {
    if table.open_session(identity).is_none() {
        if !create {
            return Err(TransferError::NotFound);
        }
        table.open_or_append(identity, tick);
    }
    if table.finish_open(identity, metadata, tick) {
        Ok(())
    } else {
        Err(TransferError::NotFound)
    }
}

/// Payload size of the first session for `identity`.
pub fn query_size(
    table: &SessionTable,
    identity: &Identity,
    require_done: bool,
) -> Result<usize, TransferError> {
    let session = if require_done {
        table.first_done(identity)
    } else {
        table.first(identity)
    };
    session
        .map(|s| s.buffer().len())
        .ok_or(TransferError::NotFound)
}

/// File name length plus a terminator slot. The name is empty until the upload finishes.
pub fn query_metadata_size(table: &SessionTable, identity: &Identity) -> Result<usize, TransferError> {
    let session = table.first(identity).ok_or(TransferError::NotFound)?;
    Ok(file_name(session.metadata()).len() + 1)
}

/// Move the payload out of the first matching session and destroy it.
pub fn consume(
    table: &mut SessionTable,
    identity: &Identity,
    requested: usize,
    policy: ConsumePolicy,
    require_done: bool,
) -> Result<Consumed, TransferError> {
    let size = query_size(table, identity, require_done)?;
    if policy == ConsumePolicy::Exact && requested != size {
        return Err(TransferError::SizeMismatch {
            expected: requested,
            actual: size,
        });
    }
    let session = table
        .take_first(identity, require_done)
        .ok_or(TransferError::NotFound)?;
    let (buffer, metadata) = session.into_parts();
    let bytes = match policy {
        ConsumePolicy::Exact => buffer.into_vec(),
        ConsumePolicy::Truncate => buffer.into_prefix(requested),
    };
    Ok(Consumed { bytes, metadata })
}

/// NUL-terminated file name of the first matching session. `expected` must equal
/// name length + 1. The session is left in place.
pub fn consume_metadata(
    table: &SessionTable,
    identity: &Identity,
    expected: usize,
) -> Result<Vec<u8>, TransferError> {
    let session = table.first(identity).ok_or(TransferError::NotFound)?;
    let name = file_name(session.metadata());
    if expected != name.len() + 1 {
        return Err(TransferError::SizeMismatch {
            expected,
            actual: name.len() + 1,
        });
    }
    let mut out = Vec::with_capacity(expected);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    Ok(out)
}

fn file_name(metadata: &Metadata) -> &str {
    match metadata {
        Metadata::FileName(name) => name,
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkOrder;
    use crate::session::DecodeId;
    use rand::seq::SliceRandom;

    fn key() -> Identity {
        Identity::key("file")
    }

    fn lenient() -> Config {
        Config {
            chunk_order: ChunkOrder::Lenient,
            ..Config::default()
        }
    }

    #[test]
    fn rejected_first_chunk_creates_nothing() {
        let mut table = SessionTable::new();
        let r = write_chunk(&mut table, &key(), &[1], 4, 2, true, &Config::default(), 0);
        assert!(matches!(r, Err(TransferError::InvalidRange { .. })));
        assert!(table.is_empty());
    }

    #[test]
    fn write_without_create_needs_session() {
        let mut table = SessionTable::new();
        let id = Identity::Decode(DecodeId(0));
        let r = write_chunk(&mut table, &id, &[1], 0, 1, false, &Config::default(), 0);
        assert!(matches!(r, Err(TransferError::NotFound)));
    }

    #[test]
    fn shuffled_chunks_reassemble_when_lenient() {
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let mut ranges = chunk::split_into_chunks(payload.len(), 17);
        ranges.shuffle(&mut rand::thread_rng());

        let mut table = SessionTable::new();
        for r in &ranges {
            write_chunk(
                &mut table,
                &key(),
                &payload[r.start..r.end],
                r.start,
                r.end,
                true,
                &lenient(),
                0,
            )
            .unwrap();
        }
        mark_done(&mut table, &key(), Metadata::FileName("f".into()), true, 0).unwrap();
        let out = consume(&mut table, &key(), 200, ConsumePolicy::Exact, false).unwrap();
        assert_eq!(out.bytes, payload);
    }

    #[test]
    fn oversized_payload_slice_is_clipped_to_range() {
        let mut table = SessionTable::new();
        write_chunk(&mut table, &key(), &[1, 2, 3, 4], 0, 2, true, &Config::default(), 0).unwrap();
        assert_eq!(query_size(&table, &key(), false).unwrap(), 2);
    }

    #[test]
    fn mark_done_creates_empty_upload() {
        let mut table = SessionTable::new();
        mark_done(&mut table, &key(), Metadata::FileName("empty.txt".into()), true, 0).unwrap();
        assert_eq!(query_size(&table, &key(), true).unwrap(), 0);
        assert_eq!(query_metadata_size(&table, &key()).unwrap(), 10);
    }

    #[test]
    fn mark_done_without_create_needs_session() {
        let mut table = SessionTable::new();
        let id = Identity::Decode(DecodeId(9));
        let r = mark_done(&mut table, &id, Metadata::Image { width: 1, height: 1 }, false, 0);
        assert!(matches!(r, Err(TransferError::NotFound)));
        assert!(table.is_empty());
    }

    #[test]
    fn metadata_size_while_accumulating_counts_terminator_only() {
        let mut table = SessionTable::new();
        write_chunk(&mut table, &key(), &[0; 3], 0, 3, true, &Config::default(), 0).unwrap();
        assert_eq!(query_metadata_size(&table, &key()).unwrap(), 1);
    }

    #[test]
    fn metadata_consume_is_repeatable() {
        let mut table = SessionTable::new();
        mark_done(&mut table, &key(), Metadata::FileName("ab".into()), true, 0).unwrap();
        assert_eq!(consume_metadata(&table, &key(), 3).unwrap(), b"ab\0".to_vec());
        assert_eq!(consume_metadata(&table, &key(), 3).unwrap(), b"ab\0".to_vec());
        assert!(matches!(
            consume_metadata(&table, &key(), 2),
            Err(TransferError::SizeMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn enqueue_refuses_duplicate_open_identity() {
        let mut table = SessionTable::new();
        let id = Identity::Decode(DecodeId(1));
        enqueue(&mut table, id.clone(), vec![1], 0).unwrap();
        assert!(matches!(
            enqueue(&mut table, id, vec![2], 0),
            Err(TransferError::Busy(_))
        ));
    }
}
