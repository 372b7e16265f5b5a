//! Block file lifecycle: create, open, recover, append, seal, sync.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use eventflow_core::entry::{Entry, LENGTH_PREFIX_SIZE};
use eventflow_core::{Id, SegmentHealth};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::index::{self, IndexEntry};
use super::{BLOCK_VERSION, HEADER_BLOCK_SIZE, HEADER_SIZE, INDEX_RECORD_SIZE};
use crate::error::{Error, Result};

/// Runs a blocking file operation off the async runtime.
pub(super) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res.map_err(Error::from),
        Err(e) => Err(Error::Internal(format!("blocking io task failed: {e}"))),
    }
}

/// The mutable cursor of a block: where the next entry lands.
///
/// The two-phase appender owns the live context; everything else sees
/// read-only snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendContext {
    /// File offset where the next entry's length prefix will be
    /// written.
    pub write_offset: u32,
    /// Logical index the next entry receives.
    pub next_index: u32,
    /// Sealed against further appends.
    pub full: bool,
}

impl AppendContext {
    /// Bytes currently in the data region.
    pub fn data_size(&self) -> u64 {
        self.write_offset as u64 - HEADER_BLOCK_SIZE
    }
}

struct Header {
    version: u32,
    capacity: u64,
    size: u64,
    number: u32,
    full: bool,
}

/// One replica of a segment: an append-only file on this volume.
///
/// A block has a single writer at any time (the segment leader); reads
/// are concurrent. The in-memory index vector is guarded by a
/// read-write lock that writers hold only while extending it.
#[derive(Debug)]
pub struct Block {
    pub(super) id: Id,
    pub(super) path: PathBuf,
    pub(super) version: u32,
    pub(super) capacity: u64,
    pub(super) file: Arc<File>,
    pub(super) actx: Mutex<AppendContext>,
    pub(super) indexes: RwLock<Vec<IndexEntry>>,
    sync_offset: AtomicU64,
    index_synced: AtomicBool,
    /// Publishes the entry count; pollers wait on it.
    pub(super) count_tx: watch::Sender<u32>,
}

impl Block {
    /// Creates a new block file of `capacity` bytes, writes the initial
    /// header, and positions the write cursor past the header block.
    pub async fn create(id: Id, path: impl AsRef<Path>, capacity: u64) -> Result<Block> {
        if capacity <= HEADER_BLOCK_SIZE + LENGTH_PREFIX_SIZE as u64 + INDEX_RECORD_SIZE {
            return Err(Error::Internal(format!(
                "block capacity {capacity} cannot hold any entry"
            )));
        }
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let file = run_blocking(move || {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&open_path)?;
            file.set_len(capacity)?;
            Ok(file)
        })
        .await?;

        let (count_tx, _) = watch::channel(0u32);
        let block = Block {
            id,
            path,
            version: BLOCK_VERSION,
            capacity,
            file: Arc::new(file),
            actx: Mutex::new(AppendContext {
                write_offset: HEADER_BLOCK_SIZE as u32,
                next_index: 0,
                full: false,
            }),
            indexes: RwLock::new(Vec::new()),
            sync_offset: AtomicU64::new(0),
            index_synced: AtomicBool::new(false),
            count_tx,
        };
        block.persist_header().await?;
        debug!(block_id = %id, capacity, "block created");
        Ok(block)
    }

    /// Opens an existing block file, recovering its state.
    ///
    /// Full blocks load the index region from the file tail; non-full
    /// blocks rebuild the index by scanning the data region forward,
    /// which also corrects `size` and `number` after a torn write.
    pub async fn open(id: Id, path: impl AsRef<Path>) -> Result<Block> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let file = Arc::new(
            run_blocking(move || OpenOptions::new().read(true).write(true).open(&open_path))
                .await?,
        );

        let header = Self::load_header(&file).await?;
        if header.version != BLOCK_VERSION {
            return Err(Error::Corrupted(format!(
                "unknown block version {}",
                header.version
            )));
        }

        let (count_tx, _) = watch::channel(header.number);
        let block = Block {
            id,
            path,
            version: header.version,
            capacity: header.capacity,
            file,
            actx: Mutex::new(AppendContext {
                write_offset: (HEADER_BLOCK_SIZE + header.size) as u32,
                next_index: header.number,
                full: header.full,
            }),
            indexes: RwLock::new(Vec::new()),
            sync_offset: AtomicU64::new(HEADER_BLOCK_SIZE + header.size),
            index_synced: AtomicBool::new(header.full),
            count_tx,
        };

        if header.full {
            block.load_index_from_file(header.number).await?;
        } else {
            block.rebuild_index().await?;
        }

        debug!(
            block_id = %id,
            number = block.entry_count(),
            full = block.is_full(),
            "block opened"
        );
        Ok(block)
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.actx.lock().unwrap().full
    }

    pub fn appendable(&self) -> bool {
        !self.is_full()
    }

    pub fn entry_count(&self) -> u32 {
        self.actx.lock().unwrap().next_index
    }

    pub fn data_size(&self) -> u64 {
        self.actx.lock().unwrap().data_size()
    }

    /// Read-only snapshot for heartbeats.
    pub fn health_info(&self) -> SegmentHealth {
        let actx = *self.actx.lock().unwrap();
        let indexes = self.indexes.read().unwrap();
        SegmentHealth {
            id: self.id,
            size: actx.data_size() as i64,
            event_number: actx.next_index,
            is_full: actx.full,
            version: self.version,
            first_event_time: indexes.first().map(|i| i.stime).unwrap_or(0),
            last_event_time: indexes.last().map(|i| i.stime).unwrap_or(0),
        }
    }

    /// Snapshot of the append context. With `last`, derives the context
    /// that follows that entry instead (used when resuming from a
    /// replicated log).
    pub fn append_ctx(&self, last: Option<&Entry>) -> AppendContext {
        match last {
            Some(entry) => AppendContext {
                write_offset: entry.offset + entry.size() as u32,
                next_index: entry.index + 1,
                // An empty payload is the seal marker.
                full: entry.payload.is_empty(),
            },
            None => *self.actx.lock().unwrap(),
        }
    }

    fn remaining(&self, data_size: u64, num: u32) -> u64 {
        self.capacity
            .saturating_sub(HEADER_BLOCK_SIZE + data_size + num as u64 * INDEX_RECORD_SIZE)
    }

    /// Phase one: assigns `(offset, index)` to each entry from `actx`
    /// and advances it, after validating that the batch plus its index
    /// records fits in the remaining capacity. Does not touch block
    /// state.
    pub fn prepare_append(&self, actx: &mut AppendContext, entries: &mut [Entry]) -> Result<()> {
        if actx.full {
            return Err(Error::Full);
        }
        if entries.is_empty() {
            return Ok(());
        }

        let mut size = 0u32;
        let mut payload_total = 0u64;
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.offset = actx.write_offset + size;
            entry.index = actx.next_index + i as u32;
            size += entry.size() as u32;
            payload_total += entry.payload.len() as u64;
        }

        let n = entries.len() as u64;
        let required = payload_total + n * (LENGTH_PREFIX_SIZE as u64 + INDEX_RECORD_SIZE);
        let remaining = self.remaining(actx.data_size(), actx.next_index);
        if required > remaining {
            return Err(Error::NotEnoughSpace {
                required,
                remaining,
            });
        }

        actx.write_offset += size;
        actx.next_index += entries.len() as u32;
        Ok(())
    }

    /// Phase two: writes the batch with one positional write, extends
    /// the in-memory index, and advances the durable cursor.
    ///
    /// Entries already committed (index below the cursor) are dropped;
    /// a gap past the cursor or inside the batch is an `Internal`
    /// error and nothing is written.
    pub async fn commit_append(&self, mut entries: Vec<Entry>) -> Result<()> {
        let snapshot = *self.actx.lock().unwrap();
        if snapshot.full {
            return Err(Error::Full);
        }

        // Drop late entries re-sent by a retrying caller.
        let skip = entries
            .iter()
            .take_while(|e| e.index < snapshot.next_index)
            .count();
        if skip > 0 {
            warn!(
                block_id = %self.id,
                skipped = skip,
                num = snapshot.next_index,
                "dropping entries already committed"
            );
        }
        let entries = entries.split_off(skip);
        if entries.is_empty() {
            return Ok(());
        }

        if entries[0].index > snapshot.next_index {
            return Err(Error::Internal(format!(
                "entry index {} ahead of cursor {}",
                entries[0].index, snapshot.next_index
            )));
        }
        if entries[0].offset != snapshot.write_offset {
            return Err(Error::Internal(format!(
                "entry offset {} does not match write offset {}",
                entries[0].offset, snapshot.write_offset
            )));
        }
        for pair in entries.windows(2) {
            if pair[0].index + 1 != pair[1].index {
                return Err(Error::Internal(format!(
                    "entry index {} is discontinuous after {}",
                    pair[1].index, pair[0].index
                )));
            }
            if pair[0].offset + pair[0].size() as u32 != pair[1].offset {
                return Err(Error::Internal(format!(
                    "entry offset {} is discontinuous after {}",
                    pair[1].offset, pair[0].offset
                )));
            }
        }

        let base = entries[0].offset;
        let last = entries.last().unwrap();
        let length = last.offset - base + last.size() as u32;
        let n = entries.len() as u64;
        let payload_total = length as u64 - n * LENGTH_PREFIX_SIZE as u64;
        let required = payload_total + n * (LENGTH_PREFIX_SIZE as u64 + INDEX_RECORD_SIZE);
        let remaining = self.remaining(snapshot.data_size(), snapshot.next_index);
        if required > remaining {
            return Err(Error::NotEnoughSpace {
                required,
                remaining,
            });
        }

        // Serialize the whole batch into one contiguous buffer: one
        // syscall per batch.
        let mut buf = vec![0u8; length as usize];
        let mut new_indexes = Vec::with_capacity(entries.len());
        for entry in &entries {
            let at = (entry.offset - base) as usize;
            let written = entry.marshal_to(&mut buf[at..at + entry.size()]);
            new_indexes.push(IndexEntry {
                offset: entry.offset as i64,
                length: written as i32,
                stime: entry.stime,
            });
        }

        let file = Arc::clone(&self.file);
        let write_at = base as u64;
        run_blocking(move || file.write_all_at(&buf, write_at)).await?;

        self.indexes.write().unwrap().extend(new_indexes);
        let new_count = {
            let mut actx = self.actx.lock().unwrap();
            actx.write_offset += length;
            actx.next_index += entries.len() as u32;
            actx.next_index
        };
        // Publish the extension so pollers observe it.
        self.count_tx.send_replace(new_count);
        Ok(())
    }

    /// Seals the block: persists the header with `full = 1` and flushes
    /// the index region to the file tail in the background. `sync` and
    /// `close` re-persist the index, so a crash between the two leaves
    /// a recoverable file either way.
    pub async fn mark_full(&self) -> Result<()> {
        {
            let mut actx = self.actx.lock().unwrap();
            if actx.full {
                return Ok(());
            }
            actx.full = true;
        }
        self.persist_header().await?;

        let file = Arc::clone(&self.file);
        let capacity = self.capacity;
        let indexes = self.indexes.read().unwrap().clone();
        let id = self.id;
        tokio::spawn(async move {
            if let Err(error) = persist_index_region(file, capacity, indexes).await {
                warn!(block_id = %id, %error, "async index flush failed");
            }
        });

        // Wake pollers so they observe the seal.
        self.count_tx.send_modify(|_| {});
        Ok(())
    }

    /// Writes the header and, if full, the index region to storage,
    /// then fsyncs. Idempotent: a no-op when nothing changed since the
    /// last sync.
    pub async fn sync(&self) -> Result<()> {
        let (write_offset, full) = {
            let actx = self.actx.lock().unwrap();
            (actx.write_offset as u64, actx.full)
        };
        let header_current = self.sync_offset.load(Ordering::Acquire) >= write_offset;
        let index_current = !full || self.index_synced.load(Ordering::Acquire);
        if header_current && index_current {
            return Ok(());
        }

        self.persist_header().await?;
        if full {
            let indexes = self.indexes.read().unwrap().clone();
            persist_index_region(Arc::clone(&self.file), self.capacity, indexes).await?;
            self.index_synced.store(true, Ordering::Release);
        }
        let file = Arc::clone(&self.file);
        run_blocking(move || file.sync_all()).await?;
        self.sync_offset.store(write_offset, Ordering::Release);
        Ok(())
    }

    /// Syncs the block; the file handle is released when the block is
    /// dropped.
    pub async fn close(&self) -> Result<()> {
        self.sync().await
    }

    async fn persist_header(&self) -> Result<()> {
        let (size, number, full) = {
            let actx = self.actx.lock().unwrap();
            (actx.data_size(), actx.next_index, actx.full)
        };
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..12].copy_from_slice(&self.capacity.to_be_bytes());
        buf[12..20].copy_from_slice(&size.to_be_bytes());
        buf[20..24].copy_from_slice(&number.to_be_bytes());
        buf[24] = full as u8;
        let crc = crc32fast::hash(&buf[0..25]);
        buf[25..29].copy_from_slice(&crc.to_le_bytes());

        let file = Arc::clone(&self.file);
        run_blocking(move || file.write_all_at(&buf, 0)).await
    }

    async fn load_header(file: &Arc<File>) -> Result<Header> {
        let file = Arc::clone(file);
        let buf = run_blocking(move || {
            let mut buf = vec![0u8; HEADER_SIZE];
            file.read_exact_at(&mut buf, 0)?;
            Ok(buf)
        })
        .await?;

        let stored_crc = u32::from_le_bytes(buf[25..29].try_into().unwrap());
        if stored_crc != 0 && stored_crc != crc32fast::hash(&buf[0..25]) {
            return Err(Error::Corrupted("header checksum mismatch".to_string()));
        }

        Ok(Header {
            version: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            capacity: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            size: u64::from_be_bytes(buf[12..20].try_into().unwrap()),
            number: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            full: buf[24] != 0,
        })
    }

    async fn load_index_from_file(&self, number: u32) -> Result<()> {
        if number == 0 {
            return Ok(());
        }
        let length = number as u64 * INDEX_RECORD_SIZE;
        let file = Arc::clone(&self.file);
        let read_at = self.capacity - length;
        let buf = run_blocking(move || {
            let mut buf = vec![0u8; length as usize];
            file.read_exact_at(&mut buf, read_at)?;
            Ok(buf)
        })
        .await?;

        let indexes = index::unmarshal_region(&buf, number);
        // A crash between the full-header write and the index flush
        // leaves zeros here; refuse to serve rather than return wrong
        // entries.
        if indexes[0].offset != HEADER_BLOCK_SIZE as i64 {
            return Err(Error::Corrupted(format!(
                "index record 0 points at {}, expected the data region start",
                indexes[0].offset
            )));
        }
        for pair in indexes.windows(2) {
            if pair[0].end_offset() != pair[1].offset {
                return Err(Error::Corrupted(
                    "index region is discontinuous".to_string(),
                ));
            }
        }
        if indexes.iter().any(|i| i.length <= LENGTH_PREFIX_SIZE as i32) {
            return Err(Error::Corrupted(
                "index region contains an empty record".to_string(),
            ));
        }
        *self.indexes.write().unwrap() = indexes;
        Ok(())
    }

    /// Rebuilds the index of a non-full block by scanning forward from
    /// the header block. The scan ends at the first zero length prefix,
    /// at a length overrunning the file, or at the end of a truncated
    /// file; whatever was declared in the header is overridden by the
    /// scan result.
    async fn rebuild_index(&self) -> Result<()> {
        let file = Arc::clone(&self.file);
        let capacity = self.capacity;
        let (indexes, end) = run_blocking(move || {
            let limit = file.metadata()?.len().min(capacity);
            let mut indexes = Vec::new();
            let mut off = HEADER_BLOCK_SIZE;
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            loop {
                if off + LENGTH_PREFIX_SIZE as u64 > limit {
                    break;
                }
                file.read_exact_at(&mut prefix, off)?;
                let length = u32::from_le_bytes(prefix);
                if length == 0 {
                    break;
                }
                let end = off + LENGTH_PREFIX_SIZE as u64 + length as u64;
                if end > limit {
                    break;
                }
                indexes.push(IndexEntry {
                    offset: off as i64,
                    length: (LENGTH_PREFIX_SIZE as u32 + length) as i32,
                    stime: 0,
                });
                off = end;
            }
            Ok((indexes, off))
        })
        .await?;

        let number = indexes.len() as u32;
        {
            let mut actx = self.actx.lock().unwrap();
            actx.write_offset = end as u32;
            actx.next_index = number;
        }
        self.count_tx.send_replace(number);
        *self.indexes.write().unwrap() = indexes;
        Ok(())
    }
}

/// Writes the index region to the file tail: `indexes.len()` records
/// ending exactly at `capacity`.
pub(super) async fn persist_index_region(
    file: Arc<File>,
    capacity: u64,
    indexes: Vec<IndexEntry>,
) -> Result<()> {
    if indexes.is_empty() {
        return Ok(());
    }
    let buf = index::marshal_region(&indexes);
    let write_at = capacity - buf.len() as u64;
    run_blocking(move || file.write_all_at(&buf, write_at)).await
}
