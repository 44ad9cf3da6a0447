// mindrecord-core/src/writer.rs

//! Shard writer implementation.

use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::WriterConfig;
use crate::error::{MindRecordError, Result};
use crate::format::{
    checksum, index_path, lock_path, shard_paths, staging_index_path, CompressionType,
    FrameHeader, IndexDatabase, IndexEntry, ShardFileMeta, ShardHeader, FRAME_HEADER_SIZE,
    MAX_SHARDS, MIN_SHARDS, SHARD_HEADER_SIZE,
};
use crate::reader::load_index;
use crate::schema::{Schema, SchemaId, SchemaRegistry};
use crate::storage::{StorageBackend, StorageWriter};
use crate::value::Record;

/// Checks a requested shard count.
pub fn validate_shard_count(num_files: usize) -> Result<()> {
    if (MIN_SHARDS..=MAX_SHARDS).contains(&num_files) {
        Ok(())
    } else {
        Err(MindRecordError::invalid_shard_count(num_files))
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct ShardSetSummary {
    pub path: PathBuf,
    pub index_path: PathBuf,
    pub schema_name: String,
    pub record_count: u64,
    pub shard_files: Vec<PathBuf>,
    /// Bytes written across all data files, headers included.
    pub bytes_written: u64,
}

struct ShardFile {
    path: PathBuf,
    writer: Option<Box<dyn StorageWriter>>,
    record_count: u64,
}

/// Writes one shard set: `num_files` data files plus the index database.
///
/// The `ShardWriter` handles:
/// - Exclusive access through a `<name>.lock` marker
/// - Round-robin placement of records across data files
/// - Optional blob compression and per-record checksums
/// - Atomic index publication on commit (temp file then rename)
///
/// A writer that is dropped without `commit` or `abort` releases its lock
/// and leaves no index behind, so readers never see the partial set.
pub struct ShardWriter {
    storage: Arc<dyn StorageBackend>,
    path: PathBuf,
    compression: CompressionType,
    compression_level: i32,
    registry: SchemaRegistry,
    schema_id: Option<SchemaId>,
    shards: Vec<ShardFile>,
    entries: Vec<IndexEntry>,
    poisoned: bool,
    finished: bool,
}

impl ShardWriter {
    /// Opens a shard set for writing.
    ///
    /// # Arguments
    ///
    /// * `storage` - Backend the files are created through
    /// * `path` - Base name of the set; data files and `<path>.db` derive from it
    /// * `num_files` - Number of data files, 1 to 1000
    /// * `config` - Compression and overwrite behavior
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `num_files` is out of range (before any I/O)
    /// - another writer holds the lock
    /// - a shard set already exists and `overwrite` is off
    /// - any data file cannot be created
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        path: impl AsRef<Path>,
        num_files: usize,
        config: WriterConfig,
    ) -> Result<Self> {
        validate_shard_count(num_files)?;
        let compression = CompressionType::from_name(&config.compression).ok_or_else(|| {
            MindRecordError::config(format!(
                "unknown compression algorithm: {}",
                config.compression
            ))
        })?;

        let path = path.as_ref().to_path_buf();
        if path.file_name().is_none() {
            return Err(MindRecordError::storage(&path, "destination has no file name"));
        }

        let lock = lock_path(&path);
        if !storage.create_new(&lock)? {
            return Err(MindRecordError::DestinationBusy { path });
        }

        // The lock is ours from here on; release it on every early return.
        if let Err(e) = prepare_destination(storage.as_ref(), &path, num_files, config.overwrite) {
            let _ = storage.delete(&lock);
            return Err(e);
        }
        let shards = match create_shards(storage.as_ref(), &path, num_files, compression) {
            Ok(shards) => shards,
            Err(e) => {
                for candidate in shard_paths(&path, num_files) {
                    if storage.exists(&candidate).unwrap_or(false) {
                        let _ = storage.delete(&candidate);
                    }
                }
                let _ = storage.delete(&lock);
                return Err(e);
            }
        };

        debug!(
            "Opened shard writer at {} ({} files, compression {})",
            path.display(),
            num_files,
            compression.name()
        );

        Ok(Self {
            storage,
            path,
            compression,
            compression_level: config.compression_level,
            registry: SchemaRegistry::new(),
            schema_id: None,
            shards,
            entries: Vec::new(),
            poisoned: false,
            finished: false,
        })
    }

    /// Registers the schema of this shard set. Only one schema is allowed.
    pub fn add_schema(&mut self, schema: Schema, name: &str) -> Result<SchemaId> {
        if self.schema_id.is_some() {
            return Err(MindRecordError::writer_state(
                "a schema has already been added to this shard set",
            ));
        }
        let id = self.registry.register(schema, name)?;
        self.schema_id = Some(id);
        Ok(id)
    }

    /// The registered schema, if any.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema_id.and_then(|id| self.registry.get(id))
    }

    pub fn num_files(&self) -> usize {
        self.shards.len()
    }

    /// Records written so far.
    pub fn record_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Encodes and appends one record. Returns its record id.
    ///
    /// An encoding error leaves the writer usable; an I/O error poisons it.
    pub fn write_record(&mut self, record: &Record) -> Result<u64> {
        if self.poisoned {
            return Err(MindRecordError::writer_state(
                "writer is unusable after a failed write; abort it",
            ));
        }
        let schema = self
            .schema()
            .ok_or_else(|| MindRecordError::writer_state("add_schema must be called before writing"))?;

        let encoded = codec::encode(schema, record)?;
        let blob = self
            .compression
            .compress(&encoded.blob, self.compression_level)?;

        let record_id = self.entries.len() as u64;
        let raw_len = section_len(record_id, "raw", encoded.raw.len())?;
        let blob_len = section_len(record_id, "blob", blob.len())?;
        let checksum = checksum(&[&encoded.raw, &blob]);

        let shard_index = (record_id % self.shards.len() as u64) as usize;
        let shard = &mut self.shards[shard_index];
        let writer = shard
            .writer
            .as_mut()
            .ok_or_else(|| MindRecordError::writer_state("shard file already closed"))?;

        let frame_offset = writer.position();
        let header = FrameHeader {
            record_id,
            raw_len,
            blob_len,
        };

        let written = writer
            .write_all(&header.to_bytes())
            .and_then(|()| writer.write_all(&encoded.raw))
            .and_then(|()| writer.write_all(&blob));
        if let Err(e) = written {
            self.poisoned = true;
            return Err(MindRecordError::storage_with_source(
                &shard.path,
                "failed to write record frame",
                e,
            ));
        }

        let raw_offset = frame_offset + FRAME_HEADER_SIZE as u64;
        self.entries.push(IndexEntry {
            record_id,
            shard: shard_index as u32,
            frame_offset,
            raw_offset,
            raw_len,
            blob_offset: raw_offset + u64::from(raw_len),
            blob_len,
            checksum,
        });
        shard.record_count += 1;

        Ok(record_id)
    }

    /// Writes every record in order and returns how many were written.
    ///
    /// Stops at the first failing record and returns its error.
    pub fn write_records<'a, I>(&mut self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut count = 0;
        for record in records {
            self.write_record(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Finishes all data files and publishes the index database.
    ///
    /// The index is staged at `.<name>.db.tmp` and renamed into place; the
    /// rename is the commit point. If anything fails before the rename, the
    /// data files, the staged index and the lock are removed.
    pub fn commit(mut self) -> Result<ShardSetSummary> {
        match self.publish() {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!("Commit of {} failed: {}", self.path.display(), e);
                if let Err(cleanup) = self.discard() {
                    warn!("Cleanup after failed commit incomplete: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn publish(&mut self) -> Result<ShardSetSummary> {
        if self.poisoned {
            return Err(MindRecordError::writer_state(
                "cannot commit after a failed write; abort the writer",
            ));
        }
        let id = self
            .schema_id
            .ok_or_else(|| MindRecordError::writer_state("cannot commit without a schema"))?;
        let schema = self
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| MindRecordError::writer_state("registered schema is missing"))?;
        let schema_name = self.registry.name(id).unwrap_or_default().to_string();

        let mut shard_files = Vec::with_capacity(self.shards.len());
        let mut bytes_written = 0;
        for shard in &mut self.shards {
            let writer = shard
                .writer
                .take()
                .ok_or_else(|| MindRecordError::writer_state("shard file already closed"))?;
            let byte_len = writer.position();
            writer.finish()?;

            bytes_written += byte_len;
            shard_files.push(ShardFileMeta {
                file_name: file_name_of(&shard.path),
                record_count: shard.record_count,
                byte_len,
            });
        }

        let index = IndexDatabase {
            schema_name: schema_name.clone(),
            schema,
            compression: self.compression,
            shard_files,
            entries: mem::take(&mut self.entries),
        };
        let bytes = index.to_bytes()?;

        let staging = staging_index_path(&self.path);
        let final_path = index_path(&self.path);
        let mut writer = self.storage.open_write(&staging)?;
        writer.write_all(&bytes).map_err(|e| {
            MindRecordError::storage_with_source(&staging, "failed to write index database", e)
        })?;
        writer.finish()?;
        self.storage.rename(&staging, &final_path)?;

        self.release_lock();
        self.finished = true;

        let summary = ShardSetSummary {
            path: self.path.clone(),
            index_path: final_path,
            schema_name,
            record_count: index.record_count(),
            shard_files: self.shards.iter().map(|s| s.path.clone()).collect(),
            bytes_written,
        };

        info!(
            "Committed shard set {} ({} records in {} files, {} bytes)",
            summary.path.display(),
            summary.record_count,
            summary.shard_files.len(),
            summary.bytes_written
        );

        Ok(summary)
    }

    /// Discards everything written so far, including the lock.
    pub fn abort(mut self) -> Result<()> {
        warn!(
            "Aborting shard writer at {} after {} records",
            self.path.display(),
            self.entries.len()
        );
        self.discard()
    }

    fn discard(&mut self) -> Result<()> {
        let mut first_error = None;
        for shard in &mut self.shards {
            drop(shard.writer.take());
            if let Err(e) = self.storage.delete(&shard.path) {
                first_error.get_or_insert(e);
            }
        }

        let staging = staging_index_path(&self.path);
        if self.storage.exists(&staging).unwrap_or(false) {
            if let Err(e) = self.storage.delete(&staging) {
                first_error.get_or_insert(e);
            }
        }

        self.release_lock();
        self.finished = true;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release_lock(&self) {
        let lock = lock_path(&self.path);
        if let Err(e) = self.storage.delete(&lock) {
            warn!("Failed to release lock {}: {}", lock.display(), e);
        }
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            "Shard writer at {} dropped without commit; {} records are not indexed",
            self.path.display(),
            self.entries.len()
        );
        self.release_lock();
    }
}

/// Removes every file belonging to the shard set at `path`: data files, the
/// index database and a leftover staging index. The lock marker is left
/// alone. Returns the removed paths.
///
/// When the index is readable it names the data files; otherwise every
/// possible data file name is probed.
pub fn destroy_shard_set(storage: &dyn StorageBackend, path: &Path) -> Result<Vec<PathBuf>> {
    let index = index_path(path);
    let mut candidates = Vec::new();

    if storage.exists(&index)? {
        match load_index(storage, path) {
            Ok(db) => candidates.extend(
                db.shard_files
                    .iter()
                    .map(|meta| path.with_file_name(&meta.file_name)),
            ),
            Err(e) => warn!("Ignoring unreadable index while destroying {}: {}", path.display(), e),
        }
    }
    if candidates.is_empty() {
        // Without an index only files carrying a data file header are ours.
        let mut probed = vec![path.to_path_buf()];
        probed.extend(shard_paths(path, MAX_SHARDS));
        for candidate in probed {
            if has_shard_header(storage, &candidate)? {
                candidates.push(candidate);
            }
        }
    }
    candidates.push(index);
    candidates.push(staging_index_path(path));

    let mut removed = Vec::new();
    for candidate in candidates {
        if storage.exists(&candidate)? {
            storage.delete(&candidate)?;
            removed.push(candidate);
        }
    }

    debug!("Destroyed shard set {} ({} files)", path.display(), removed.len());
    Ok(removed)
}

fn has_shard_header(storage: &dyn StorageBackend, path: &Path) -> Result<bool> {
    if !storage.exists(path)? || storage.file_len(path)? < SHARD_HEADER_SIZE as u64 {
        return Ok(false);
    }
    let bytes = storage.open_read(path)?.read_range(0, SHARD_HEADER_SIZE)?;
    Ok(ShardHeader::from_bytes(&bytes).is_some_and(|header| header.is_valid()))
}

fn prepare_destination(
    storage: &dyn StorageBackend,
    path: &Path,
    num_files: usize,
    overwrite: bool,
) -> Result<()> {
    let mut occupied = storage.exists(&index_path(path))?;
    for candidate in shard_paths(path, num_files) {
        occupied = occupied || storage.exists(&candidate)?;
    }
    if !occupied {
        return Ok(());
    }
    if !overwrite {
        return Err(MindRecordError::DestinationExists {
            path: path.to_path_buf(),
        });
    }

    destroy_shard_set(storage, path)?;
    // A set with a different file count may have left the requested names behind.
    for candidate in shard_paths(path, num_files) {
        if storage.exists(&candidate)? {
            storage.delete(&candidate)?;
        }
    }
    Ok(())
}

fn create_shards(
    storage: &dyn StorageBackend,
    path: &Path,
    num_files: usize,
    compression: CompressionType,
) -> Result<Vec<ShardFile>> {
    let mut shards = Vec::with_capacity(num_files);
    for (shard_id, shard_path) in shard_paths(path, num_files).into_iter().enumerate() {
        let mut writer = storage.open_write(&shard_path)?;
        let header = ShardHeader::new(shard_id as u32, num_files as u32, compression);
        // Flushed now so a crashed writer still leaves recognizable data files.
        writer
            .write_all(&header.to_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| {
                MindRecordError::storage_with_source(&shard_path, "failed to write shard header", e)
            })?;

        shards.push(ShardFile {
            path: shard_path,
            writer: Some(writer),
            record_count: 0,
        });
    }
    Ok(shards)
}

fn section_len(record_id: u64, section: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        MindRecordError::serialization(format!(
            "record {record_id}: {section} section of {len} bytes exceeds the 4 GiB frame limit"
        ))
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
