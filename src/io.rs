//! Collaborators that move chunks in and out of the engine.
//!
//! The engine never touches storage directly. A store call pushes its chunks to a [`Target`]
//! once per commit; a load call pulls chunks from a [`Source`], first the initial set and then
//! as many rounds of requested object ids as the graph needs.
//!
//! Two implementations ship with the crate: [`MemoryStore`] keeps the latest entity of every
//! object id in memory, [`FileStore`] appends chunks to a file through a [`SeqWriter`] and
//! reads it back through a memory map.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, poisoned};
use crate::format::{EntityView, index_entities, iter_entities};
use crate::graph::Oid;

/// An owned chunk of complete entities.
pub type RawChunk = Arc<[u8]>;

/// A borrowed chunk produced by a commit, tagged with its output channel.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRef<'a> {
    /// Output channel the entities were sharded to.
    pub channel: usize,
    /// Concatenated entities.
    pub bytes: &'a [u8],
}

/// Object ids requested from a source, grouped by channel.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    channels: Vec<BTreeSet<Oid>>,
}

impl LoadRequest {
    /// An empty request over `channel_count` channels (a power of two).
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![BTreeSet::new(); channel_count.max(1)],
        }
    }

    /// Adds `oid`; returns false if it was already requested.
    pub fn require(&mut self, oid: Oid) -> bool {
        let channel = oid.channel(self.channels.len());
        self.channels[channel].insert(oid)
    }

    /// True if `oid` is requested.
    pub fn contains(&self, oid: Oid) -> bool {
        self.channels[oid.channel(self.channels.len())].contains(&oid)
    }

    /// The per-channel sets.
    pub fn channels(&self) -> &[BTreeSet<Oid>] {
        &self.channels
    }

    /// Every requested id.
    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.channels.iter().flatten().copied()
    }

    /// Total number of requested ids.
    pub fn len(&self) -> usize {
        self.channels.iter().map(BTreeSet::len).sum()
    }

    /// True if nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(BTreeSet::is_empty)
    }

    /// Moves the requested ids out, leaving an empty request of the same shape.
    pub fn take(&mut self) -> Self {
        let empty = vec![BTreeSet::new(); self.channels.len()];
        Self {
            channels: std::mem::replace(&mut self.channels, empty),
        }
    }

    /// Removes every requested id.
    pub fn clear(&mut self) {
        self.channels.iter_mut().for_each(BTreeSet::clear);
    }
}

/// Pull side: where a loader reads entities from.
pub trait Source: Send + Sync {
    /// The chunks a load starts from.
    fn read_initial(&self) -> Result<Vec<RawChunk>>;

    /// Chunks containing the latest entities of the requested ids. Ids the source does not
    /// hold are left out; the loader reports them.
    fn read_by_object_ids(&self, request: &LoadRequest) -> Result<Vec<RawChunk>>;
}

/// Push side: where a storer's commit writes to.
pub trait Target: Send + Sync {
    /// Persists the chunks of one commit.
    fn write(&self, chunks: &[ChunkRef<'_>]) -> Result<()>;
}

fn concat<'a>(entities: impl Iterator<Item = &'a [u8]>) -> Vec<RawChunk> {
    let bytes: Vec<u8> = entities.flatten().copied().collect();
    if bytes.is_empty() {
        Vec::new()
    } else {
        vec![RawChunk::from(bytes)]
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<Oid, Vec<u8>>,
    order: Vec<Oid>,
    commits: usize,
}

/// In-memory source and target keeping the latest entity of every object id.
///
/// The initial read returns every entity, in the order their ids were first written.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct object ids stored.
    pub fn entity_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(state.entities.len())
    }

    /// Number of commits received.
    pub fn commit_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(state.commits)
    }

    /// True if an entity for `oid` was written.
    pub fn contains(&self, oid: Oid) -> Result<bool> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(state.entities.contains_key(&oid))
    }

    /// The latest entity bytes (header included) of `oid`.
    pub fn entity(&self, oid: Oid) -> Result<Option<Vec<u8>>> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(state.entities.get(&oid).cloned())
    }

    /// Writes raw entity bytes directly, bypassing any storer.
    pub fn insert_raw(&self, bytes: &[u8]) -> Result<()> {
        self.write(&[ChunkRef { channel: 0, bytes }])
    }
}

impl Target for MemoryStore {
    fn write(&self, chunks: &[ChunkRef<'_>]) -> Result<()> {
        // Validate everything before touching the state so that a bad chunk writes nothing.
        let mut entities = Vec::new();
        for chunk in chunks {
            for span in index_entities(chunk.bytes)? {
                let end = span.offset + span.header.total_length as usize;
                entities.push((span.header.oid, &chunk.bytes[span.offset..end]));
            }
        }
        let mut state = self.state.write().map_err(poisoned("memory store"))?;
        for (oid, bytes) in entities {
            if state.entities.insert(oid, bytes.to_vec()).is_none() {
                state.order.push(oid);
            }
        }
        state.commits += 1;
        Ok(())
    }
}

impl Source for MemoryStore {
    fn read_initial(&self) -> Result<Vec<RawChunk>> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(concat(
            state
                .order
                .iter()
                .filter_map(|oid| state.entities.get(oid).map(Vec::as_slice)),
        ))
    }

    fn read_by_object_ids(&self, request: &LoadRequest) -> Result<Vec<RawChunk>> {
        let state = self.state.read().map_err(poisoned("memory store"))?;
        Ok(concat(
            request
                .oids()
                .filter_map(|oid| state.entities.get(&oid).map(Vec::as_slice)),
        ))
    }
}

/// A thread-safe writer that appends data to a file and tracks the current offset.
#[derive(Debug)]
pub struct SeqWriter {
    inner: Mutex<WriterState>,
}

#[derive(Debug)]
struct WriterState {
    writer: BufWriter<File>,
    current_offset: u64,
}

impl SeqWriter {
    /// Opens `path` for appending, creating it if missing.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_offset = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(WriterState {
                writer: BufWriter::new(file),
                current_offset,
            }),
        })
    }

    /// Atomically writes a complete buffer. Returns the offset where it starts.
    pub fn write_all(&self, buffer: &[u8]) -> Result<u64> {
        let mut state = self.inner.lock().map_err(poisoned("SeqWriter"))?;
        let start_offset = state.current_offset;
        state.writer.write_all(buffer)?;
        state.current_offset += buffer.len() as u64;
        Ok(start_offset)
    }

    /// Flushes buffered bytes to the file.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.lock().map_err(poisoned("SeqWriter"))?;
        state.writer.flush()?;
        Ok(())
    }

    /// Returns the current end of the file.
    pub fn current_offset(&self) -> Result<u64> {
        let state = self.inner.lock().map_err(poisoned("SeqWriter"))?;
        Ok(state.current_offset)
    }
}

/// Append-only file of entities.
///
/// Later entities of an object id supersede earlier ones. The initial read returns the whole
/// file as one chunk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    writer: SeqWriter,
}

impl FileStore {
    /// Opens or creates the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = SeqWriter::append(&path)?;
        Ok(Self { path, writer })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length.
    pub fn len(&self) -> Result<u64> {
        self.writer.current_offset()
    }

    /// True if nothing was written yet.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    fn map(&self) -> Result<Option<Mmap>> {
        self.writer.flush()?;
        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        // Safety: the file is only ever appended to through `writer`, so mapped bytes
        // are never modified while the map is alive.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Some(mmap))
    }
}

impl Target for FileStore {
    fn write(&self, chunks: &[ChunkRef<'_>]) -> Result<()> {
        for chunk in chunks {
            let offset = self.writer.write_all(chunk.bytes)?;
            debug!(channel = chunk.channel, offset, bytes = chunk.bytes.len(), "appended chunk");
        }
        self.writer.flush()
    }
}

impl Source for FileStore {
    fn read_initial(&self) -> Result<Vec<RawChunk>> {
        let Some(mmap) = self.map()? else {
            return Ok(Vec::new());
        };
        // Validate before handing out.
        for entity in iter_entities(&mmap) {
            entity?;
        }
        Ok(vec![RawChunk::from(&mmap[..])])
    }

    fn read_by_object_ids(&self, request: &LoadRequest) -> Result<Vec<RawChunk>> {
        let Some(mmap) = self.map()? else {
            return Ok(Vec::new());
        };
        let mut latest: HashMap<Oid, (usize, usize)> = HashMap::new();
        let mut offset = 0;
        while offset < mmap.len() {
            let entity = EntityView::parse(&mmap[offset..])?;
            let len = entity.header().total_length as usize;
            if request.contains(entity.oid()) {
                latest.insert(entity.oid(), (offset, len));
            }
            offset += len;
        }
        Ok(concat(
            request
                .oids()
                .filter_map(|oid| latest.get(&oid))
                .map(|&(start, len)| &mmap[start..start + len]),
        ))
    }
}
