// mindrecord-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Data files at or above the configured threshold are memory-mapped, so
//! decode workers slice frames straight out of the page cache. Smaller files
//! and the index database go through a `BufReader`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageConfig;
use crate::error::{MindRecordError, Result};

/// Maps an I/O failure on `path` into a storage error.
fn io_context(path: &Path, action: impl Into<String>) -> impl FnOnce(io::Error) -> MindRecordError {
    let path = path.to_path_buf();
    let action = action.into();
    move |e| MindRecordError::storage_with_source(path, action, e)
}

/// Storage rooted at a base directory. Absolute paths bypass the base.
pub struct LocalStorage {
    root: PathBuf,
    buffer_size: usize,
    mmap_threshold: Option<u64>,
}

impl LocalStorage {
    /// Creates the backend, creating the base directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the base directory cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let root = config.base_path.clone();
        fs::create_dir_all(&root).map_err(io_context(&root, "cannot create base directory"))?;

        Ok(Self {
            root,
            buffer_size: config.buffer_size,
            mmap_threshold: config.use_mmap.then_some(config.mmap_threshold),
        })
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Full path of `path`, with its parent directory created.
    fn prepared_path(&self, path: &Path) -> Result<PathBuf> {
        let full = self.full_path(path);
        match full.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                fs::create_dir_all(dir).map_err(io_context(dir, "cannot create directory"))?;
            }
            _ => {}
        }
        Ok(full)
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.full_path(path).is_file())
    }

    fn file_len(&self, path: &Path) -> Result<u64> {
        let full = self.full_path(path);
        let meta = fs::metadata(&full).map_err(io_context(&full, "cannot stat file"))?;
        Ok(meta.len())
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full = self.full_path(path);
        let file = File::open(&full).map_err(io_context(&full, "cannot open for reading"))?;
        let len = file
            .metadata()
            .map_err(io_context(&full, "cannot stat file"))?
            .len();

        let backing = match self.mmap_threshold {
            Some(threshold) if len > 0 && len >= threshold => {
                // SAFETY: the map is read-only and a committed shard set is
                // never rewritten in place; destroy and overwrite unlink files
                // rather than truncating them.
                let map = unsafe { Mmap::map(&file) }.map_err(io_context(&full, "cannot map file"))?;
                Backing::Mapped(map)
            }
            _ => Backing::Buffered(BufReader::with_capacity(self.buffer_size, file)),
        };

        Ok(Box::new(LocalReader { path: full, len, backing }))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full = self.prepared_path(path)?;
        let file = File::create(&full).map_err(io_context(&full, "cannot create file"))?;

        Ok(Box::new(LocalWriter {
            out: BufWriter::with_capacity(self.buffer_size, file),
            path: full,
            written: 0,
        }))
    }

    fn create_new(&self, path: &Path) -> Result<bool> {
        let full = self.prepared_path(path)?;
        match OpenOptions::new().write(true).create_new(true).open(&full) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_context(&full, "cannot create exclusively")(e)),
        }
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full = self.full_path(path);
        fs::remove_file(&full).map_err(io_context(&full, "cannot remove file"))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let source = self.full_path(from);
        let target = self.prepared_path(to)?;
        fs::rename(&source, &target)
            .map_err(io_context(&source, format!("cannot move to {}", target.display())))
    }
}

enum Backing {
    Buffered(BufReader<File>),
    Mapped(Mmap),
}

/// Reader over one local file.
struct LocalReader {
    path: PathBuf,
    len: u64,
    backing: Backing,
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.len
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let end = start.checked_add(length as u64).filter(|&end| end <= self.len);
        let Some(end) = end else {
            return Err(MindRecordError::storage(
                &self.path,
                format!("range at {start} of {length} bytes ends past {} bytes", self.len),
            ));
        };

        match &mut self.backing {
            Backing::Mapped(map) => Ok(map[start as usize..end as usize].to_vec()),
            Backing::Buffered(file) => {
                let mut buf = vec![0u8; length];
                file.seek(SeekFrom::Start(start))
                    .and_then(|_| file.read_exact(&mut buf))
                    .map_err(io_context(&self.path, format!("cannot read {length} bytes at {start}")))?;
                Ok(buf)
            }
        }
    }
}

/// Buffered writer that counts bytes so frame offsets need no seeking.
struct LocalWriter {
    out: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn position(&self) -> u64 {
        self.written
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let LocalWriter { out, path, .. } = *self;
        let file = out
            .into_inner()
            .map_err(|e| MindRecordError::storage_with_source(&path, "cannot flush file", e.into_error()))?;
        file.sync_all().map_err(io_context(&path, "cannot sync file"))
    }
}
