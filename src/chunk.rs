//! Growable per-channel output buffers.
//!
//! A [`ChunkBuffer`] collects the entities of one output channel during a store call. Entities
//! are never split: each one is written into a single contiguous region, and a buffer that
//! cannot take the next entity is sealed while a new one is appended.

use crate::error::{Result, SwizzleError};
use crate::format::{ContentWriter, ENTITY_HEADER_LENGTH, EntityHeader};
use crate::graph::{Oid, Tid};

/// Sequence of byte buffers owned by one output channel.
#[derive(Debug)]
pub struct ChunkBuffer {
    buffers: Vec<Vec<u8>>,
    increment: usize,
}

impl ChunkBuffer {
    /// Creates a buffer whose regions grow by at least `increment` bytes.
    pub fn new(increment: usize) -> Self {
        let increment = increment.max(ENTITY_HEADER_LENGTH);
        Self {
            buffers: vec![Vec::with_capacity(increment)],
            increment,
        }
    }

    /// Reserves `len` contiguous zeroed bytes for one entity.
    ///
    /// When the current buffer cannot take `len` more bytes it is replaced if still empty,
    /// otherwise it is sealed at its used length and a new buffer is appended. The new
    /// capacity is `max(increment, len)`.
    pub fn allocate(&mut self, len: usize) -> &mut [u8] {
        let increment = self.increment;
        if self.buffers.is_empty() {
            self.buffers.push(Vec::with_capacity(increment.max(len)));
        }
        let last = self.buffers.len() - 1;
        let current = &self.buffers[last];
        if current.capacity() - current.len() < len {
            let fresh = Vec::with_capacity(increment.max(len));
            if current.is_empty() {
                self.buffers[last] = fresh;
            } else {
                self.buffers.push(fresh);
            }
        }
        let last = self.buffers.len() - 1;
        let current = &mut self.buffers[last];
        let start = current.len();
        current.resize(start + len, 0);
        &mut current[start..]
    }

    /// True if no entity has been written since the last clear.
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(Vec::is_empty)
    }

    /// Total number of bytes written.
    pub fn byte_len(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// Number of regions currently held.
    pub fn region_count(&self) -> usize {
        self.buffers.len()
    }

    /// The non-empty regions, in write order.
    pub fn regions(&self) -> impl Iterator<Item = &[u8]> {
        self.buffers
            .iter()
            .filter(|b| !b.is_empty())
            .map(Vec::as_slice)
    }

    /// Capacity of the first region, kept across clears.
    pub fn first_capacity(&self) -> usize {
        self.buffers.first().map_or(0, Vec::capacity)
    }

    /// Drops every overflow region and empties the first one, keeping its allocation.
    pub fn clear(&mut self) {
        self.buffers.truncate(1);
        if let Some(first) = self.buffers.first_mut() {
            first.clear();
        }
    }
}

/// Write access to the next entity of one channel, handed to a type handler's `store`.
#[derive(Debug)]
pub struct EntitySink<'a> {
    buffer: &'a mut ChunkBuffer,
    tid: Tid,
    oid: Oid,
    min_length: u64,
    max_length: u64,
}

impl<'a> EntitySink<'a> {
    pub(crate) fn new(
        buffer: &'a mut ChunkBuffer,
        tid: Tid,
        oid: Oid,
        min_length: u64,
        max_length: u64,
    ) -> Self {
        Self {
            buffer,
            tid,
            oid,
            min_length,
            max_length,
        }
    }

    /// Object id of the entity being written.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Type id of the entity being written.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Writes the header for `content_length` bytes and returns a writer for the content.
    pub fn begin(self, content_length: usize) -> Result<ContentWriter<'a>> {
        let length = content_length as u64;
        if length < self.min_length || length > self.max_length {
            return Err(SwizzleError::InvalidEntityLength {
                oid: self.oid,
                length,
                min: self.min_length,
                max: self.max_length,
            });
        }
        let header = EntityHeader::new(self.tid, self.oid, content_length);
        let region = self
            .buffer
            .allocate(ENTITY_HEADER_LENGTH + content_length);
        let (head, content) = region.split_at_mut(ENTITY_HEADER_LENGTH);
        head.copy_from_slice(&header.to_bytes());
        Ok(ContentWriter::new(content))
    }
}
