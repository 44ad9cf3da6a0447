// mindrecord-core/src/reader.rs

//! Shard reader and record streams.
//!
//! A reader loads the index database once and shares it read-only between
//! every stream it creates. Streams decode either inline on the caller's
//! thread or on a pool of worker threads:
//!
//! ```text
//! order:   [p0 p1 p2 p3 | p4 p5 p6 p7 | p8 p9 ...]     (block_size = 4)
//!            block 0       block 1       block 2
//! worker:    0             1             0             (2 workers)
//! ```
//!
//! Each worker decodes its blocks in order into its own bounded channel. The
//! consumer pulls block `b` from worker `b % workers`, so the output order is
//! the same for every worker count.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::codec;
use crate::config::ReaderConfig;
use crate::error::{MindRecordError, Result};
use crate::format::{
    checksum, index_path, FrameHeader, IndexDatabase, ShardHeader, FRAME_HEADER_SIZE,
    SHARD_HEADER_SIZE,
};
use crate::schema::Schema;
use crate::storage::{StorageBackend, StorageReader};
use crate::value::Record;

/// Reads and verifies the index database of the shard set at `path`.
///
/// # Errors
///
/// Returns `NotCommitted` if the index is absent and `CorruptIndex` if it
/// fails verification.
pub fn load_index(storage: &dyn StorageBackend, path: &Path) -> Result<IndexDatabase> {
    let db_path = index_path(path);
    if !storage.exists(&db_path)? {
        return Err(MindRecordError::NotCommitted {
            path: path.to_path_buf(),
        });
    }

    let mut reader = storage.open_read(&db_path)?;
    let size = reader.size() as usize;
    let bytes = reader.read_range(0, size)?;
    IndexDatabase::from_bytes(&db_path, &bytes)
}

/// Random and streaming access to a committed shard set.
pub struct ShardReader {
    storage: Arc<dyn StorageBackend>,
    path: PathBuf,
    index: Arc<IndexDatabase>,
    shard_paths: Arc<Vec<PathBuf>>,
    config: ReaderConfig,
}

impl ShardReader {
    /// Opens the shard set at `path`.
    ///
    /// Every data file is checked for presence, header and size, and every
    /// index entry must lie inside its data file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the reader options are invalid
    /// - the set was never committed (`NotCommitted`)
    /// - the index or a data file is inconsistent (`CorruptIndex`)
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        path: impl AsRef<Path>,
        config: ReaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let index = load_index(storage.as_ref(), &path)?;
        let shard_paths = verify_layout(storage.as_ref(), &path, &index)?;

        debug!(
            "Opened shard reader at {} ({} records, {} files)",
            path.display(),
            index.entries.len(),
            shard_paths.len()
        );

        Ok(Self {
            storage,
            path,
            index: Arc::new(index),
            shard_paths: Arc::new(shard_paths),
            config,
        })
    }

    /// Number of records in the set, taken from the index alone.
    pub fn get_size(&self) -> u64 {
        self.index.record_count()
    }

    pub fn schema(&self) -> &Schema {
        &self.index.schema
    }

    pub fn schema_name(&self) -> &str {
        &self.index.schema_name
    }

    pub fn shard_files(&self) -> &[PathBuf] {
        &self.shard_paths
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &IndexDatabase {
        &self.index
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Decodes the record with the given id.
    pub fn read_record(&self, record_id: u64) -> Result<Record> {
        let count = self.get_size();
        if record_id >= count {
            return Err(MindRecordError::RecordOutOfRange { record_id, count });
        }
        self.loader().load(record_id as usize)
    }

    /// Creates a fresh stream over every record.
    ///
    /// Unshuffled streams follow write order. Shuffled streams use the
    /// configured seed, or a new random seed on every call.
    pub fn records(&self) -> RecordStream {
        let mut order: Vec<usize> = (0..self.index.entries.len()).collect();
        if self.config.shuffle {
            let seed = self.config.seed.unwrap_or_else(rand::random);
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
            debug!("Shuffling {} records with seed {}", order.len(), seed);
        }

        let workers = self.config.num_parallel_workers.min(order.len().max(1));
        debug!(
            "Starting record stream over {} ({} records, {} workers)",
            self.path.display(),
            order.len(),
            workers
        );

        if workers <= 1 {
            RecordStream::inline(self.loader(), order)
        } else {
            RecordStream::parallel(
                self,
                Arc::new(order),
                workers,
                self.config.block_size,
                self.config.channel_capacity,
            )
        }
    }

    fn loader(&self) -> RecordLoader {
        RecordLoader::new(
            self.storage.clone(),
            self.index.clone(),
            self.shard_paths.clone(),
            self.config.verify_checksums,
        )
    }
}

fn verify_layout(
    storage: &dyn StorageBackend,
    path: &Path,
    index: &IndexDatabase,
) -> Result<Vec<PathBuf>> {
    let db_path = index_path(path);
    let corrupt = |message: String| MindRecordError::corrupt_index(&db_path, message);

    let shard_count = index.shard_files.len();
    if shard_count == 0 {
        return Err(corrupt("index lists no data files".to_string()));
    }
    index
        .schema
        .validate()
        .map_err(|e| corrupt(format!("stored schema is invalid: {e}")))?;

    let mut shard_paths = Vec::with_capacity(shard_count);
    for (shard_id, meta) in index.shard_files.iter().enumerate() {
        let shard_path = path.with_file_name(&meta.file_name);
        if !storage.exists(&shard_path)? {
            return Err(corrupt(format!("data file {} is missing", shard_path.display())));
        }

        let actual = storage.file_len(&shard_path)?;
        if actual != meta.byte_len {
            return Err(corrupt(format!(
                "data file {} is {} bytes, index records {}",
                shard_path.display(),
                actual,
                meta.byte_len
            )));
        }

        let mut reader = storage.open_read(&shard_path)?;
        let header_bytes = reader
            .read_range(0, SHARD_HEADER_SIZE)
            .map_err(|e| corrupt(format!("cannot read header of {}: {e}", shard_path.display())))?;
        let header = ShardHeader::from_bytes(&header_bytes)
            .filter(ShardHeader::is_valid)
            .ok_or_else(|| corrupt(format!("data file {} has an invalid header", shard_path.display())))?;
        if header.shard_id as usize != shard_id
            || header.shard_count as usize != shard_count
            || header.compression() != Some(index.compression)
        {
            return Err(corrupt(format!(
                "data file {} header does not match the index",
                shard_path.display()
            )));
        }

        shard_paths.push(shard_path);
    }

    let mut per_shard = vec![0u64; shard_count];
    for (position, entry) in index.entries.iter().enumerate() {
        if entry.record_id != position as u64 {
            return Err(corrupt(format!(
                "entry {position} carries record id {}",
                entry.record_id
            )));
        }
        let shard = entry.shard as usize;
        let Some(meta) = index.shard_files.get(shard) else {
            return Err(corrupt(format!(
                "record {} points at missing shard {shard}",
                entry.record_id
            )));
        };
        let frame_ok = entry.frame_offset >= SHARD_HEADER_SIZE as u64
            && entry.raw_offset == entry.frame_offset + FRAME_HEADER_SIZE as u64
            && entry.blob_offset == entry.raw_offset + u64::from(entry.raw_len)
            && entry.end_offset() <= meta.byte_len;
        if !frame_ok {
            return Err(corrupt(format!(
                "record {} lies outside data file {}",
                entry.record_id, meta.file_name
            )));
        }
        per_shard[shard] += 1;
    }

    for (meta, counted) in index.shard_files.iter().zip(&per_shard) {
        if meta.record_count != *counted {
            return Err(corrupt(format!(
                "data file {} should hold {} records, index has {}",
                meta.file_name, meta.record_count, counted
            )));
        }
    }

    Ok(shard_paths)
}

/// Decodes records by index position. Owns its file handles.
struct RecordLoader {
    storage: Arc<dyn StorageBackend>,
    index: Arc<IndexDatabase>,
    shard_paths: Arc<Vec<PathBuf>>,
    handles: Vec<Option<Box<dyn StorageReader>>>,
    verify_checksums: bool,
}

impl RecordLoader {
    fn new(
        storage: Arc<dyn StorageBackend>,
        index: Arc<IndexDatabase>,
        shard_paths: Arc<Vec<PathBuf>>,
        verify_checksums: bool,
    ) -> Self {
        let handles = (0..shard_paths.len()).map(|_| None).collect();
        Self {
            storage,
            index,
            shard_paths,
            handles,
            verify_checksums,
        }
    }

    fn load(&mut self, position: usize) -> Result<Record> {
        let entry = self.index.entries[position];
        let record_id = entry.record_id;
        let shard = entry.shard as usize;

        if self.handles[shard].is_none() {
            self.handles[shard] = Some(self.storage.open_read(&self.shard_paths[shard])?);
        }
        let Some(handle) = self.handles[shard].as_mut() else {
            return Err(MindRecordError::corrupt_record(record_id, "data file handle unavailable"));
        };

        let frame_len = (entry.end_offset() - entry.frame_offset) as usize;
        let frame = handle.read_range(entry.frame_offset, frame_len)?;

        let header = FrameHeader::from_bytes(&frame)
            .ok_or_else(|| MindRecordError::corrupt_record(record_id, "truncated frame header"))?;
        if header.record_id != record_id
            || header.raw_len != entry.raw_len
            || header.blob_len != entry.blob_len
        {
            return Err(MindRecordError::corrupt_record(
                record_id,
                "frame header does not match the index",
            ));
        }

        let raw_end = FRAME_HEADER_SIZE + entry.raw_len as usize;
        let raw = &frame[FRAME_HEADER_SIZE..raw_end];
        let stored_blob = &frame[raw_end..];

        if self.verify_checksums {
            let computed = checksum(&[raw, stored_blob]);
            if computed != entry.checksum {
                return Err(MindRecordError::corrupt_record(
                    record_id,
                    format!("checksum mismatch: expected {}, got {}", entry.checksum, computed),
                ));
            }
        }

        let blob = self
            .index
            .compression
            .decompress(stored_blob)
            .map_err(|e| MindRecordError::corrupt_record(record_id, e.to_string()))?;

        codec::decode(&self.index.schema, raw, &blob)
            .map_err(|e| MindRecordError::corrupt_record(record_id, e.to_string()))
    }
}

enum StreamState {
    Inline {
        loader: RecordLoader,
        order: Vec<usize>,
    },
    Parallel {
        receivers: Vec<Receiver<Result<Record>>>,
        workers: Vec<JoinHandle<()>>,
        stop_flag: Arc<AtomicBool>,
        block_size: usize,
        order: Arc<Vec<usize>>,
    },
}

/// A finite stream of decoded records.
///
/// Yields every record exactly once. After the first error the stream ends.
/// Dropping the stream stops and joins its worker threads.
pub struct RecordStream {
    state: StreamState,
    next: usize,
    total: usize,
    failed: bool,
}

impl RecordStream {
    fn inline(loader: RecordLoader, order: Vec<usize>) -> Self {
        let total = order.len();
        Self {
            state: StreamState::Inline { loader, order },
            next: 0,
            total,
            failed: false,
        }
    }

    fn parallel(
        reader: &ShardReader,
        order: Arc<Vec<usize>>,
        num_workers: usize,
        block_size: usize,
        channel_capacity: usize,
    ) -> Self {
        let total = order.len();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let mut receivers = Vec::with_capacity(num_workers);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = channel::bounded(channel_capacity);
            let loader = reader.loader();
            let order = Arc::clone(&order);
            let stop_flag = stop_flag.clone();

            workers.push(thread::spawn(move || {
                decode_worker(worker_id, num_workers, block_size, loader, &order, &tx, &stop_flag);
            }));
            receivers.push(rx);
        }

        Self {
            state: StreamState::Parallel {
                receivers,
                workers,
                stop_flag,
                block_size,
                order,
            },
            next: 0,
            total,
            failed: false,
        }
    }
}

fn decode_worker(
    worker_id: usize,
    num_workers: usize,
    block_size: usize,
    mut loader: RecordLoader,
    order: &[usize],
    tx: &Sender<Result<Record>>,
    stop_flag: &AtomicBool,
) {
    for block in order.chunks(block_size).skip(worker_id).step_by(num_workers) {
        for &position in block {
            if stop_flag.load(Ordering::Relaxed) {
                return;
            }
            let result = loader.load(position);
            let failed = result.is_err();
            // A closed channel means the stream was dropped.
            if tx.send(result).is_err() || failed {
                return;
            }
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.total {
            return None;
        }
        let position = self.next;
        self.next += 1;

        let result = match &mut self.state {
            StreamState::Inline { loader, order } => loader.load(order[position]),
            StreamState::Parallel {
                receivers,
                block_size,
                order,
                ..
            } => {
                let worker = (position / *block_size) % receivers.len();
                receivers[worker].recv().unwrap_or_else(|_| {
                    Err(MindRecordError::corrupt_record(
                        order[position] as u64,
                        format!("decode worker {worker} exited before delivering this record"),
                    ))
                })
            }
        };

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        if let StreamState::Parallel {
            receivers,
            workers,
            stop_flag,
            ..
        } = &mut self.state
        {
            stop_flag.store(true, Ordering::Relaxed);
            // Unblocks workers waiting on a full channel.
            receivers.clear();
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
