//! Single-file node store with per-store root histories
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("DLAYERDB")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - last_segment: 8 bytes (u64 LE, offset of the newest segment)
//!   - segment_count: 8 bytes (u64 LE)
//!   - store_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [RECORDS and SEGMENTS, interleaved, append-only]
//!   record:  blob data
//!   segment: prev: u64 LE, entries: u32 LE, roots: u32 LE,
//!            (hash, offset u64, size u32) per node written since the
//!            previous segment,
//!            (store_id, generation u64, root) per root appended
//! ```
//!
//! Segments form a chain from the header back to the first one. Replaying
//! the chain oldest first rebuilds the node index and every root history.
//! A checkpoint appends one segment holding only what changed, fsyncs, and
//! only then rewrites the header to point at it. The header write is the
//! commit point. Later records are appended after the newest segment, so a
//! committed segment is never overwritten.

use crate::model::{Hash, Node, StoreId};
use crate::store::blob::Blob;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 64;
const SEGMENT_HEADER_SIZE: usize = 16;
const INDEX_ENTRY_SIZE: usize = 44;
const ROOT_ENTRY_SIZE: usize = 72;

/// Default zstd level for node records
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// One root appended to a store's history
#[derive(Clone, Copy, Debug)]
struct RootUpdate {
    store_id: StoreId,
    generation: u64,
    root: Hash,
}

/// Tail of the committed segment chain
#[derive(Clone, Copy, Debug, Default)]
struct Checkpoint {
    last_segment: u64,
    segments: u64,
    objects: u64,
}

#[derive(Clone, Copy, Debug)]
struct SegmentHeader {
    prev: u64,
    entries: usize,
    roots: usize,
}

impl SegmentHeader {
    fn body_len(&self) -> usize {
        self.entries * INDEX_ENTRY_SIZE + self.roots * ROOT_ENTRY_SIZE
    }
}

/// Content-addressed node storage plus the store-id → root history table
pub struct ObjectStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Hash, IndexEntry>>,
    roots: RwLock<HashMap<StoreId, Vec<Hash>>>,
    write_offset: RwLock<u64>,
    /// Index entries written since the last checkpoint
    pending: Mutex<Vec<(Hash, IndexEntry)>>,
    /// Serializes checkpoints; roots only change while it is held
    checkpoint: Mutex<Checkpoint>,
    compression_level: i32,
}

impl ObjectStore {
    /// Create a new database file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        debug!(path = %path.display(), "created database file");

        Ok(Self::from_parts(
            path,
            file,
            HashMap::new(),
            HashMap::new(),
            HEADER_SIZE,
            Checkpoint::default(),
        ))
    }

    /// Open an existing database file at its last committed checkpoint
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| {
            Error::InvalidFile(format!("cannot read header of {}: {}", path.display(), e))
        })?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = u32::from_le_bytes(array_at(&header, 8));
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let checkpoint = Checkpoint {
            objects: u64::from_le_bytes(array_at(&header, 16)),
            last_segment: u64::from_le_bytes(array_at(&header, 24)),
            segments: u64::from_le_bytes(array_at(&header, 32)),
        };
        let store_count = u64::from_le_bytes(array_at(&header, 40));

        let file_len = file.seek(SeekFrom::End(0))?;

        // Walk back to the first segment, then replay oldest first
        let mut chain = Vec::new();
        let mut offset = checkpoint.last_segment;
        for _ in 0..checkpoint.segments {
            if offset < HEADER_SIZE || offset + SEGMENT_HEADER_SIZE as u64 > file_len {
                return Err(Error::StorageCorruption(
                    "segment chain breaks before the recorded count".into(),
                ));
            }
            let segment = read_segment_header(&mut file, offset)?;
            let end = offset + (SEGMENT_HEADER_SIZE + segment.body_len()) as u64;
            if end > file_len {
                return Err(Error::StorageCorruption(format!(
                    "segment at {} runs past the end of the file",
                    offset
                )));
            }
            chain.push((offset, segment));
            offset = segment.prev;
        }
        if offset != 0 {
            return Err(Error::StorageCorruption(
                "segment chain is longer than the recorded count".into(),
            ));
        }

        let mut index = HashMap::new();
        let mut roots: HashMap<StoreId, Vec<Hash>> = HashMap::new();
        for (offset, segment) in chain.into_iter().rev() {
            let mut body = vec![0u8; segment.body_len()];
            file.seek(SeekFrom::Start(offset + SEGMENT_HEADER_SIZE as u64))?;
            file.read_exact(&mut body)?;

            let (entries, updates) = body.split_at(segment.entries * INDEX_ENTRY_SIZE);
            for entry in entries.chunks_exact(INDEX_ENTRY_SIZE) {
                let hash = Hash::from_bytes(array_at(entry, 0));
                let offset = u64::from_le_bytes(array_at(entry, 32));
                let size = u32::from_le_bytes(array_at(entry, 40));
                index.insert(hash, IndexEntry { offset, size });
            }
            for update in updates.chunks_exact(ROOT_ENTRY_SIZE) {
                let store_id = StoreId::from_bytes(array_at(update, 0));
                let generation = u64::from_le_bytes(array_at(update, 32));
                let root = Hash::from_bytes(array_at(update, 40));
                let history = roots.entry(store_id).or_default();
                if history.len() as u64 != generation {
                    return Err(Error::StorageCorruption(format!(
                        "store {} jumps from generation {} to {}",
                        store_id,
                        history.len(),
                        generation
                    )));
                }
                history.push(root);
            }
        }

        if index.len() as u64 != checkpoint.objects || roots.len() as u64 != store_count {
            return Err(Error::StorageCorruption(format!(
                "header records {} objects in {} stores, segments hold {} in {}",
                checkpoint.objects,
                store_count,
                index.len(),
                roots.len()
            )));
        }

        // Anything past the last checkpoint belongs to an interrupted commit
        // and is simply left behind.
        let write_offset = file_len;

        debug!(
            path = %path.display(),
            objects = index.len(),
            stores = roots.len(),
            segments = checkpoint.segments,
            "opened database file"
        );

        Ok(Self::from_parts(
            path,
            file,
            index,
            roots,
            write_offset,
            checkpoint,
        ))
    }

    fn from_parts(
        path: PathBuf,
        file: File,
        index: HashMap<Hash, IndexEntry>,
        roots: HashMap<StoreId, Vec<Hash>>,
        write_offset: u64,
        checkpoint: Checkpoint,
    ) -> Self {
        ObjectStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            roots: RwLock::new(roots),
            write_offset: RwLock::new(write_offset),
            pending: Mutex::new(Vec::new()),
            checkpoint: Mutex::new(checkpoint),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Set the zstd level used for records written from now on
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    // === Nodes ===

    /// Store a node if absent, returning its hash
    pub fn put_node(&self, node: &Node) -> Result<Hash> {
        let hash = node.hash();

        if self.index.read().contains_key(&hash) {
            return Ok(hash);
        }

        let compressed = Blob::from_node(node)?.compress(self.compression_level)?;
        let size = compressed.len() as u32;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;

            *write_offset = offset + size as u64;
            offset
        };

        let entry = IndexEntry { offset, size };
        {
            let mut index = self.index.write();
            // A concurrent writer may have stored the same node meanwhile
            if index.contains_key(&hash) {
                return Ok(hash);
            }
            index.insert(hash, entry);
            self.pending.lock().push((hash, entry));
        }
        debug!(node = %hash.short(), size, "wrote node");

        Ok(hash)
    }

    /// Load a node, verifying that its content still hashes to `hash`
    pub fn get_node(&self, hash: &Hash) -> Result<Node> {
        let entry = self
            .index
            .read()
            .get(hash)
            .copied()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }

        let node = Blob::decompress(&data)?.to_node()?;
        let actual = node.hash();
        if actual != *hash {
            return Err(Error::StorageCorruption(format!(
                "node stored under {} hashes to {}",
                hash, actual
            )));
        }
        Ok(node)
    }

    pub fn contains_node(&self, hash: &Hash) -> bool {
        self.index.read().contains_key(hash)
    }

    pub fn node_count(&self) -> usize {
        self.index.read().len()
    }

    // === Roots ===

    /// Register a new store whose only root is the empty tree.
    ///
    /// Returns `false` without writing anything if the id is taken.
    pub fn create_root(&self, store_id: StoreId) -> Result<bool> {
        let mut checkpoint = self.checkpoint.lock();
        let store_count = {
            let roots = self.roots.read();
            if roots.contains_key(&store_id) {
                return Ok(false);
            }
            roots.len() + 1
        };

        let update = RootUpdate {
            store_id,
            generation: 0,
            root: Hash::ZERO,
        };
        self.write_checkpoint(&mut checkpoint, &[update], store_count)?;
        self.roots.write().insert(store_id, vec![Hash::ZERO]);
        Ok(true)
    }

    /// Current root of a store
    pub fn get_root(&self, store_id: &StoreId) -> Result<Hash> {
        self.roots
            .read()
            .get(store_id)
            .and_then(|history| history.last().copied())
            .ok_or(Error::UnknownStore(*store_id))
    }

    /// Append `root` to the store's history and commit it durably.
    ///
    /// Every node reachable from `root` must already be written with
    /// [`ObjectStore::put_node`]. Returns the new generation.
    pub fn set_root(&self, store_id: &StoreId, root: Hash) -> Result<u64> {
        if !root.is_zero() && !self.contains_node(&root) {
            return Err(Error::NotFound(root.to_hex()));
        }

        let mut checkpoint = self.checkpoint.lock();
        let (generation, store_count) = {
            let roots = self.roots.read();
            let history = roots
                .get(store_id)
                .ok_or(Error::UnknownStore(*store_id))?;
            (history.len() as u64, roots.len())
        };

        let update = RootUpdate {
            store_id: *store_id,
            generation,
            root,
        };
        self.write_checkpoint(&mut checkpoint, &[update], store_count)?;
        if let Some(history) = self.roots.write().get_mut(store_id) {
            history.push(root);
        }

        debug!(store = %store_id, root = %root.short(), generation, "committed root");
        Ok(generation)
    }

    /// Every root a store has had, oldest first
    pub fn root_history(&self, store_id: &StoreId) -> Result<Vec<Hash>> {
        self.roots
            .read()
            .get(store_id)
            .cloned()
            .ok_or(Error::UnknownStore(*store_id))
    }

    pub fn contains_store(&self, store_id: &StoreId) -> bool {
        self.roots.read().contains_key(store_id)
    }

    /// All store ids, sorted
    pub fn list_stores(&self) -> Vec<StoreId> {
        let mut ids: Vec<_> = self.roots.read().keys().copied().collect();
        ids.sort();
        ids
    }

    // === Persistence ===

    /// Checkpoint nodes written since the last commit, if there are any
    pub fn sync(&self) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock();
        if self.pending.lock().is_empty() {
            return Ok(());
        }
        let store_count = self.roots.read().len();
        self.write_checkpoint(&mut checkpoint, &[], store_count)
    }

    /// Whether nodes were written since the last checkpoint
    pub fn is_dirty(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Append a segment for the pending entries plus `updates`.
    ///
    /// Pending entries go back in the queue if the segment cannot be
    /// committed.
    fn write_checkpoint(
        &self,
        checkpoint: &mut Checkpoint,
        updates: &[RootUpdate],
        store_count: usize,
    ) -> Result<()> {
        let entries = std::mem::take(&mut *self.pending.lock());
        if let Err(e) = self.append_segment(checkpoint, &entries, updates, store_count) {
            let mut pending = self.pending.lock();
            let newer = std::mem::replace(&mut *pending, entries);
            pending.extend(newer);
            return Err(e);
        }
        Ok(())
    }

    fn append_segment(
        &self,
        checkpoint: &mut Checkpoint,
        entries: &[(Hash, IndexEntry)],
        updates: &[RootUpdate],
        store_count: usize,
    ) -> Result<()> {
        let mut write_offset = self.write_offset.write();
        let mut file = self.file.write();

        // Records first, so the segment never points at unwritten data
        file.sync_data()?;

        let segment_offset = *write_offset;
        let mut segment = Vec::with_capacity(
            SEGMENT_HEADER_SIZE + entries.len() * INDEX_ENTRY_SIZE + updates.len() * ROOT_ENTRY_SIZE,
        );
        segment.extend_from_slice(&checkpoint.last_segment.to_le_bytes());
        segment.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        segment.extend_from_slice(&(updates.len() as u32).to_le_bytes());
        for (hash, entry) in entries {
            segment.extend_from_slice(hash.as_bytes());
            segment.extend_from_slice(&entry.offset.to_le_bytes());
            segment.extend_from_slice(&entry.size.to_le_bytes());
        }
        for update in updates {
            segment.extend_from_slice(update.store_id.as_bytes());
            segment.extend_from_slice(&update.generation.to_le_bytes());
            segment.extend_from_slice(update.root.as_bytes());
        }

        file.seek(SeekFrom::Start(segment_offset))?;
        file.write_all(&segment)?;
        file.sync_data()?;

        let committed = Checkpoint {
            last_segment: segment_offset,
            segments: checkpoint.segments + 1,
            objects: checkpoint.objects + entries.len() as u64,
        };
        let mut header_tail = Vec::with_capacity(32);
        header_tail.extend_from_slice(&committed.objects.to_le_bytes());
        header_tail.extend_from_slice(&committed.last_segment.to_le_bytes());
        header_tail.extend_from_slice(&committed.segments.to_le_bytes());
        header_tail.extend_from_slice(&(store_count as u64).to_le_bytes());
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&header_tail)?;
        file.sync_data()?;

        *write_offset = segment_offset + segment.len() as u64;
        *checkpoint = committed;
        debug!(
            segment = segment_offset,
            entries = entries.len(),
            roots = updates.len(),
            "wrote checkpoint"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "failed to sync on drop");
        }
    }
}

fn read_segment_header(file: &mut File, offset: u64) -> Result<SegmentHeader> {
    let mut buf = [0u8; SEGMENT_HEADER_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(SegmentHeader {
        prev: u64::from_le_bytes(array_at(&buf, 0)),
        entries: u32::from_le_bytes(array_at(&buf, 8)) as usize,
        roots: u32::from_le_bytes(array_at(&buf, 12)) as usize,
    })
}

fn array_at<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}
