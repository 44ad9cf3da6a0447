// mindrecord-core/src/storage/traits.rs

//! Storage abstraction traits.
//!
//! Shard writers and readers never touch `std::fs` directly; they go through
//! a `StorageBackend` so tests and embedders can swap the filesystem.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Positional read access to one stored file.
///
/// Readers are not shared between threads: every decode worker opens its
/// own handle per data file.
pub trait StorageReader: Send {
    /// Total length of the file in bytes, fixed when it was opened.
    fn size(&self) -> u64;

    /// Reads exactly `length` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the range runs past `size()` or the
    /// underlying read fails.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// Append-only write access to one stored file.
pub trait StorageWriter: Write + Send {
    /// Number of bytes accepted so far. Shard writers use this as the
    /// offset of the next frame.
    fn position(&self) -> u64;

    /// Flushes and syncs the file. The writer is consumed.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Filesystem operations needed to write, commit, read and destroy a
/// shard set.
///
/// Shared as `Arc<dyn StorageBackend>` between a writer, its readers and
/// their worker threads.
pub trait StorageBackend: Send + Sync {
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Length in bytes of the file at `path`.
    fn file_len(&self, path: &Path) -> Result<u64>;

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Creates or truncates `path`, creating missing parent directories.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Creates an empty file only if nothing is at `path` yet. Returns
    /// `Ok(false)` when the file already exists. Writer locks rely on this
    /// being atomic.
    fn create_new(&self, path: &Path) -> Result<bool>;

    fn delete(&self, path: &Path) -> Result<()>;

    /// Moves `from` over `to`, replacing `to` if present. The index commit
    /// relies on this being atomic within one directory.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}
