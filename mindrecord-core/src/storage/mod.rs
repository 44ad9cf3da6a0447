// mindrecord-core/src/storage/mod.rs

//! Storage abstraction for shard sets.
//!
//! Shard writers, readers and the save pipeline address files through the
//! `StorageBackend` trait. `LocalStorage` is the filesystem implementation;
//! relative paths resolve against its configured base path.
//!
//! # Example
//!
//! ```no_run
//! use mindrecord_core::config::StorageConfig;
//! use mindrecord_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("example.bin")).unwrap();
//! writer.write_all(b"payload").unwrap();
//! writer.finish().unwrap();
//!
//! let mut reader = storage.open_read(Path::new("example.bin")).unwrap();
//! assert_eq!(reader.read_range(0, 7).unwrap(), b"payload");
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
