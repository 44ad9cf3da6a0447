// mindrecord-core/src/session.rs

//! Session orchestration.
//!
//! This module provides the `Session` struct that ties the storage backend,
//! the writer and reader options, and the convert pipeline together.
//!
//! # Example
//!
//! ```no_run
//! use mindrecord_core::schema::{FieldSpec, FieldType, Schema};
//! use mindrecord_core::value::{Record, Value};
//! use mindrecord_core::Session;
//!
//! let session = Session::new().unwrap();
//!
//! // Write a shard set by hand
//! let mut writer = session.create_writer("labels.mindrecord", 2).unwrap();
//! let schema = Schema::new().with_field("label", FieldSpec::scalar(FieldType::Int32));
//! writer.add_schema(schema, "labels").unwrap();
//! let mut record = Record::new();
//! record.insert("label".to_string(), Value::Int32(7));
//! writer.write_record(&record).unwrap();
//! writer.commit().unwrap();
//!
//! // Read it back and re-save it as a single file
//! let reader = session.open_reader("labels.mindrecord").unwrap();
//! assert_eq!(reader.get_size(), 1);
//! session.save(reader.records(), "copy.mindrecord", 1, "mindrecord").unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::MindRecordConfig;
use crate::error::Result;
use crate::format::{index_path, lock_path};
use crate::pipeline::{save_with, RecordSource, SaveSummary};
use crate::reader::ShardReader;
use crate::storage::{LocalStorage, StorageBackend};
use crate::writer::{destroy_shard_set, ShardWriter};

/// Entry point owning configuration and storage.
///
/// The `Session` provides methods for:
/// - Creating shard writers and opening shard readers
/// - Saving record sources through the convert pipeline
/// - Removing and probing shard sets
pub struct Session {
    config: MindRecordConfig,
    storage: Arc<dyn StorageBackend>,
}

impl Session {
    /// Creates a session with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be initialized.
    pub fn new() -> Result<Self> {
        Self::from_config(MindRecordConfig::default())
    }

    /// Creates a session from a TOML configuration file. Environment
    /// variable overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = MindRecordConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a session from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// backend cannot be initialized.
    pub fn from_config(config: MindRecordConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);
        Ok(Self { config, storage })
    }

    /// Creates a session over an existing storage backend.
    pub fn with_storage(config: MindRecordConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, storage })
    }

    /// Opens a writer for a new shard set of `num_files` data files.
    pub fn create_writer(&self, path: impl AsRef<Path>, num_files: usize) -> Result<ShardWriter> {
        ShardWriter::open(
            self.storage.clone(),
            path,
            num_files,
            self.config.writer.clone(),
        )
    }

    /// Opens a committed shard set with the session's reader options.
    pub fn open_reader(&self, path: impl AsRef<Path>) -> Result<ShardReader> {
        ShardReader::open(self.storage.clone(), path, self.config.reader.clone())
    }

    /// Drains `source` into a new shard set.
    pub fn save<S: RecordSource>(
        &self,
        source: S,
        destination: impl AsRef<Path>,
        num_files: usize,
        file_format: &str,
    ) -> Result<SaveSummary> {
        save_with(
            self.storage.clone(),
            self.config.writer.clone(),
            source,
            destination,
            num_files,
            file_format,
        )
    }

    /// Removes a shard set, including a stale writer lock. Returns the
    /// removed paths.
    pub fn destroy(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let mut removed = destroy_shard_set(self.storage.as_ref(), path)?;

        let lock = lock_path(path);
        if self.storage.exists(&lock)? {
            self.storage.delete(&lock)?;
            removed.push(lock);
        }
        Ok(removed)
    }

    /// Whether a committed shard set exists at `path`.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.storage.exists(&index_path(path.as_ref()))
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &MindRecordConfig {
        &self.config
    }

    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }
}
