//! Byte buffer addressed by absolute offset; grows to cover the highest byte written.

/// Growable byte region. Writes may arrive out of order or leave gaps;
/// gaps read back as zero but callers should not depend on that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy `bytes` to `offset`, growing the buffer if it ends short of `offset + bytes.len()`.
    /// Overlapping writes replace earlier content.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Consume, keeping at most the first `len` bytes.
    pub fn into_prefix(mut self, len: usize) -> Vec<u8> {
        self.data.truncate(len);
        self.data
    }
}
