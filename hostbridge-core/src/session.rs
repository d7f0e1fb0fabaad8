//! Transfer sessions and the table that owns them.
//!
//! Sessions are kept in append order so "first match" lookups are stable, and
//! every identity maps to at most one open (not yet done) session.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::ByteBuffer;

/// Natively assigned identity of a decode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecodeId(pub u32);

impl fmt::Display for DecodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decode#{}", self.0)
    }
}

/// Key distinguishing one transfer from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Caller-supplied key, typically the id of a host input element.
    Key(String),
    Decode(DecodeId),
}

impl Identity {
    pub fn key(key: &str) -> Self {
        Identity::Key(key.to_owned())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Key(k) => write!(f, "key:{}", k),
            Identity::Decode(id) => id.fmt(f),
        }
    }
}

/// Width/height the host reports when it could not decode an image.
pub const DECODE_FAILED_DIMENSIONS: (i32, i32) = (-1, -1);

/// Transfer-specific metadata, set when the producer finishes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Metadata {
    #[default]
    None,
    FileName(String),
    Image { width: i32, height: i32 },
}

impl Metadata {
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Metadata::Image { width, height } if (*width, *height) == DECODE_FAILED_DIMENSIONS)
    }
}

/// One in-flight or completed transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    identity: Identity,
    buffer: ByteBuffer,
    metadata: Metadata,
    done: bool,
    /// Decode input waiting for the host; released on completion.
    input: Vec<u8>,
    last_activity_tick: u64,
    /// End offset of the most recent chunk.
    next_offset: usize,
}

impl TransferSession {
    pub fn new(identity: Identity, tick: u64) -> Self {
        Self {
            identity,
            buffer: ByteBuffer::new(),
            metadata: Metadata::None,
            done: false,
            input: Vec::new(),
            last_activity_tick: tick,
            next_offset: 0,
        }
    }

    pub fn with_input(identity: Identity, input: Vec<u8>, tick: u64) -> Self {
        Self {
            input,
            ..Self::new(identity, tick)
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    /// Copy a chunk to `start`. Range checks are the caller's job.
    pub fn write_chunk(&mut self, start: usize, bytes: &[u8], tick: u64) {
        self.buffer.write_at(start, bytes);
        self.next_offset = start + bytes.len();
        self.last_activity_tick = tick;
    }

    fn finish(&mut self, metadata: Metadata, tick: u64) {
        self.metadata = metadata;
        self.done = true;
        self.input = Vec::new();
        self.last_activity_tick = tick;
    }

    /// Split into buffer and metadata.
    pub fn into_parts(self) -> (ByteBuffer, Metadata) {
        (self.buffer, self.metadata)
    }
}

/// Ordered session collection. Exclusively owns every session until it is taken.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<u64, TransferSession>,
    /// identity -> sequence number of its single open session.
    open: HashMap<Identity, u64>,
    next_seq: u64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Append a session. An open session is refused (and handed back) when its
    /// identity already has one open.
    pub fn append(&mut self, session: TransferSession) -> Result<(), TransferSession> {
        if !session.done && self.open.contains_key(&session.identity) {
            return Err(session);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        if !session.done {
            self.open.insert(session.identity.clone(), seq);
        }
        self.sessions.insert(seq, session);
        Ok(())
    }

    pub fn open_session(&self, identity: &Identity) -> Option<&TransferSession> {
        self.open.get(identity).and_then(|seq| self.sessions.get(seq))
    }

    /// The open session for `identity`, appending a fresh one if none is open.
    pub fn open_or_append(&mut self, identity: &Identity, tick: u64) -> &mut TransferSession {
        let seq = match self.open.get(identity) {
            Some(&seq) => seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.open.insert(identity.clone(), seq);
                seq
            }
        };
        self.sessions
            .entry(seq)
            .or_insert_with(|| TransferSession::new(identity.clone(), tick))
    }

    /// Mark the open session for `identity` done. Returns false if none is open.
    pub fn finish_open(&mut self, identity: &Identity, metadata: Metadata, tick: u64) -> bool {
        let Some(seq) = self.open.remove(identity) else {
            return false;
        };
        match self.sessions.get_mut(&seq) {
            Some(session) => {
                session.finish(metadata, tick);
                true
            }
            None => false,
        }
    }

    /// First (oldest) session for `identity`, done or not.
    pub fn first(&self, identity: &Identity) -> Option<&TransferSession> {
        self.sessions.values().find(|s| s.identity == *identity)
    }

    /// First done session for `identity`.
    pub fn first_done(&self, identity: &Identity) -> Option<&TransferSession> {
        self.sessions
            .values()
            .find(|s| s.done && s.identity == *identity)
    }

    /// Remove and return the first session for `identity`, restricted to done ones if asked.
    pub fn take_first(&mut self, identity: &Identity, require_done: bool) -> Option<TransferSession> {
        let seq = self
            .sessions
            .iter()
            .find(|(_, s)| s.identity == *identity && (s.done || !require_done))
            .map(|(&seq, _)| seq)?;
        if self.open.get(identity) == Some(&seq) {
            self.open.remove(identity);
        }
        self.sessions.remove(&seq)
    }

    /// Most recently appended open session whose identity satisfies `pred`.
    pub fn last_open_where<F>(&self, pred: F) -> Option<&TransferSession>
    where
        F: Fn(&Identity) -> bool,
    {
        self.sessions
            .values()
            .rev()
            .find(|s| !s.done && pred(&s.identity))
    }

    /// Drop sessions idle for longer than their TTL. `done_ttl == 0` keeps completed sessions.
    pub fn reap(&mut self, now: u64, open_ttl: u64, done_ttl: u64) -> Vec<Identity> {
        let expired: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                let idle = now.saturating_sub(s.last_activity_tick);
                if s.done {
                    done_ttl > 0 && idle > done_ttl
                } else {
                    open_ttl > 0 && idle > open_ttl
                }
            })
            .map(|(&seq, _)| seq)
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for seq in expired {
            if let Some(session) = self.sessions.remove(&seq) {
                if self.open.get(&session.identity) == Some(&seq) {
                    self.open.remove(&session.identity);
                }
                out.push(session.identity);
            }
        }
        out
    }
}
