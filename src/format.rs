//! Defines the binary layout of stored entities.
//!
//! # Entity Layout
//! A chunk is a plain concatenation of complete entities. Every entity is
//!
//! `[8B totalLength] [8B typeId] [8B objectId] [content]`
//!
//! where `totalLength` counts the 24-byte header plus the content. All integers are
//! little endian.
//!
//! ## Content Grammar
//! - Fixed primitive: raw bytes at the primitive's width.
//! - Reference: an 8-byte object id, 0 for null.
//! - Variable-length list: `[8B byteLength] [8B elementCount] [elements]`, where `byteLength`
//!   counts the 16-byte list header as well. Nested lists repeat the same convention per
//!   contained element group.
//!
//! Content is accessed through [`ContentReader`] and [`ContentWriter`], cursor types over a
//! `(buffer, offset)` pair. Nothing in the engine does raw address arithmetic.

use crate::error::{Result, SwizzleError};
use crate::graph::{Oid, Tid};

/// Size of the entity header: total length, type id and object id.
pub const ENTITY_HEADER_LENGTH: usize = 24;

/// Size of an encoded reference.
pub const REFERENCE_LENGTH: usize = 8;

/// Size of the header in front of every variable-length list.
pub const LIST_HEADER_LENGTH: usize = 16;

/// The decoded header of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHeader {
    /// Header plus content length in bytes.
    pub total_length: u64,
    /// Type id of the handler that wrote the entity.
    pub tid: Tid,
    /// Object id of the stored instance.
    pub oid: Oid,
}

impl EntityHeader {
    /// Builds the header for an entity with `content_length` bytes of content.
    pub fn new(tid: Tid, oid: Oid, content_length: usize) -> Self {
        Self {
            total_length: (ENTITY_HEADER_LENGTH + content_length) as u64,
            tid,
            oid,
        }
    }

    /// Length of the content following the header.
    pub fn content_length(&self) -> u64 {
        self.total_length.saturating_sub(ENTITY_HEADER_LENGTH as u64)
    }

    /// Serializes to a fixed-size byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; ENTITY_HEADER_LENGTH] {
        let mut buf = [0u8; ENTITY_HEADER_LENGTH];
        buf[0..8].copy_from_slice(&self.total_length.to_le_bytes());
        buf[8..16].copy_from_slice(&self.tid.as_u64().to_le_bytes());
        buf[16..24].copy_from_slice(&self.oid.as_u64().to_le_bytes());
        buf
    }

    /// Deserializes from the first 24 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTITY_HEADER_LENGTH {
            return Err(SwizzleError::Format(format!(
                "{} bytes left, too small for an entity header",
                bytes.len()
            )));
        }
        Ok(Self {
            total_length: read_u64(&bytes[0..8]),
            tid: Tid::new(read_u64(&bytes[8..16])),
            oid: Oid::new(read_u64(&bytes[16..24])),
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8]))
}

/// A borrowed, header-validated view of one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    header: EntityHeader,
    content: &'a [u8],
}

impl<'a> EntityView<'a> {
    /// Parses the entity starting at the beginning of `bytes`.
    ///
    /// `bytes` may extend past the entity; the view covers exactly `totalLength` bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = EntityHeader::from_bytes(bytes)?;
        if header.total_length < ENTITY_HEADER_LENGTH as u64 {
            return Err(SwizzleError::Format(format!(
                "entity {} declares total length {} below the header size",
                header.oid, header.total_length
            )));
        }
        if header.total_length > bytes.len() as u64 {
            return Err(SwizzleError::Format(format!(
                "entity {} declares total length {} but only {} bytes remain",
                header.oid,
                header.total_length,
                bytes.len()
            )));
        }
        let end = header.total_length as usize;
        Ok(Self {
            header,
            content: &bytes[ENTITY_HEADER_LENGTH..end],
        })
    }

    /// Builds a view from a header and content slice that belong together.
    pub fn from_parts(tid: Tid, oid: Oid, content: &'a [u8]) -> Self {
        Self {
            header: EntityHeader::new(tid, oid, content.len()),
            content,
        }
    }

    /// The decoded header.
    pub fn header(&self) -> EntityHeader {
        self.header
    }

    /// Type id of the entity.
    pub fn tid(&self) -> Tid {
        self.header.tid
    }

    /// Object id of the entity.
    pub fn oid(&self) -> Oid {
        self.header.oid
    }

    /// The content bytes following the header.
    pub fn content(&self) -> &'a [u8] {
        self.content
    }

    /// A reader positioned at the first content byte.
    pub fn reader(&self) -> ContentReader<'a> {
        ContentReader::new(self.content)
    }

    /// Reads the list header at the start of the content, the convention used by every
    /// list-shaped native type.
    pub fn leading_list(&self) -> Result<ListHeader> {
        self.reader().read_list_header()
    }
}

/// Position of a validated entity inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySpan {
    /// Byte offset of the header inside the chunk.
    pub offset: usize,
    /// Decoded header.
    pub header: EntityHeader,
}

/// Validates the structure of a chunk and returns the position of every entity in it.
pub fn index_entities(chunk: &[u8]) -> Result<Vec<EntitySpan>> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while offset < chunk.len() {
        let view = EntityView::parse(&chunk[offset..])?;
        spans.push(EntitySpan {
            offset,
            header: view.header(),
        });
        offset += view.header().total_length as usize;
    }
    Ok(spans)
}

/// Iterates the entities of a chunk, stopping at the first malformed one.
pub fn iter_entities(chunk: &[u8]) -> EntityIter<'_> {
    EntityIter {
        chunk,
        offset: 0,
        failed: false,
    }
}

/// Iterator returned by [`iter_entities`].
#[derive(Debug)]
pub struct EntityIter<'a> {
    chunk: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for EntityIter<'a> {
    type Item = Result<EntityView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.chunk.len() {
            return None;
        }
        match EntityView::parse(&self.chunk[self.offset..]) {
            Ok(view) => {
                self.offset += view.header().total_length as usize;
                Some(Ok(view))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Header of a variable-length list block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    /// Block length including the 16-byte list header.
    pub byte_length: u64,
    /// Number of elements (or element groups) in the block.
    pub element_count: u64,
}

impl ListHeader {
    /// Header for `element_count` elements occupying `body_length` bytes.
    pub fn new(body_length: usize, element_count: usize) -> Self {
        Self {
            byte_length: (LIST_HEADER_LENGTH + body_length) as u64,
            element_count: element_count as u64,
        }
    }

    /// Length of the element bytes behind the header.
    pub fn body_length(&self) -> u64 {
        self.byte_length.saturating_sub(LIST_HEADER_LENGTH as u64)
    }
}

/// Cursor over entity content.
#[derive(Debug, Clone)]
pub struct ContentReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ContentReader<'a> {
    /// Creates a reader positioned at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Current offset from the start of the content.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left behind the cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(SwizzleError::Format(format!(
                "read of {len} bytes at offset {} overruns content of {} bytes",
                self.position,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Advances the cursor by `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        Ok(bytes.try_into().unwrap_or([0; N]))
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads an encoded reference.
    pub fn read_oid(&mut self) -> Result<Oid> {
        self.read_u64().map(Oid::new)
    }

    /// Reads a list header and checks that its block fits in the remaining content.
    pub fn read_list_header(&mut self) -> Result<ListHeader> {
        let header = ListHeader {
            byte_length: self.read_u64()?,
            element_count: self.read_u64()?,
        };
        if header.byte_length < LIST_HEADER_LENGTH as u64 {
            return Err(SwizzleError::Format(format!(
                "list block length {} is smaller than its header",
                header.byte_length
            )));
        }
        if header.body_length() > self.remaining() as u64 {
            return Err(SwizzleError::Format(format!(
                "list block of {} bytes overruns content ({} bytes left)",
                header.byte_length,
                self.remaining()
            )));
        }
        Ok(header)
    }

    /// Skips a complete list block, header included.
    pub fn skip_list(&mut self) -> Result<ListHeader> {
        let header = self.read_list_header()?;
        self.skip(header.body_length() as usize)?;
        Ok(header)
    }
}

/// Cursor writing entity content into a pre-sized region.
#[derive(Debug)]
pub struct ContentWriter<'a> {
    bytes: &'a mut [u8],
    position: usize,
}

impl<'a> ContentWriter<'a> {
    /// Creates a writer over a region of exactly the content length.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Current offset from the start of the content.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes still to be written.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Copies `data` into the region and advances past it.
    pub fn put_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining() {
            return Err(SwizzleError::Internal(format!(
                "write of {} bytes at offset {} overruns entity content of {} bytes",
                data.len(),
                self.position,
                self.bytes.len()
            )));
        }
        self.bytes[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
        Ok(())
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_bytes(&[value])
    }

    /// Writes a little-endian `u16`.
    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes an encoded reference.
    pub fn put_oid(&mut self, oid: Oid) -> Result<()> {
        self.put_u64(oid.as_u64())
    }

    /// Writes a list header.
    pub fn put_list_header(&mut self, header: ListHeader) -> Result<()> {
        self.put_u64(header.byte_length)?;
        self.put_u64(header.element_count)
    }

    /// Checks that the whole region was written.
    pub fn finish(self) -> Result<()> {
        if self.position != self.bytes.len() {
            return Err(SwizzleError::Internal(format!(
                "handler wrote {} of {} content bytes",
                self.position,
                self.bytes.len()
            )));
        }
        Ok(())
    }
}

/// Writes a list block of `count` elements of `element_width` bytes each.
///
/// The header is written first from the announced `count`; the elements are then pulled from
/// `elements`. A source that yields more or fewer elements than announced fails with
/// [`SwizzleError::InconsistentElementCount`].
pub fn write_list<I, F>(
    out: &mut ContentWriter<'_>,
    count: usize,
    element_width: usize,
    elements: I,
    mut write_element: F,
) -> Result<()>
where
    I: IntoIterator,
    F: FnMut(I::Item, &mut ContentWriter<'_>) -> Result<()>,
{
    out.put_list_header(ListHeader::new(count * element_width, count))?;
    let mut written = 0usize;
    for element in elements {
        if written == count {
            return Err(SwizzleError::InconsistentElementCount {
                declared: count as u64,
                actual: written as u64 + 1,
            });
        }
        write_element(element, out)?;
        written += 1;
    }
    if written != count {
        return Err(SwizzleError::InconsistentElementCount {
            declared: count as u64,
            actual: written as u64,
        });
    }
    Ok(())
}
