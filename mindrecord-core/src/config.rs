// mindrecord-core/src/config.rs

//! Session configuration.
//!
//! Loaded from TOML, optionally overridden from `MINDRECORD_*` environment
//! variables, and validated before a session touches storage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{MindRecordError, Result};
use crate::format::CompressionType;

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MindRecordConfig {
    pub storage: StorageConfig,
    pub writer: WriterConfig,
    pub reader: ReaderConfig,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative shard set paths resolve against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for reads.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

/// Shard writer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Blob compression: "none", "lz4", or "zstd".
    pub compression: String,
    /// Compression level (zstd only).
    pub compression_level: i32,
    /// Whether an existing shard set at the destination is replaced.
    pub overwrite: bool,
}

/// Shard reader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Number of decode threads.
    pub num_parallel_workers: usize,
    /// Whether records are yielded in a shuffled order.
    pub shuffle: bool,
    /// Optional seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Whether record checksums are verified on decode.
    pub verify_checksums: bool,
    /// Decoded records buffered per worker.
    pub channel_capacity: usize,
    /// Consecutive positions handed to one worker at a time.
    pub block_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: "none".to_string(),
            compression_level: 3,
            overwrite: false,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            num_parallel_workers: 1,
            shuffle: false,
            seed: None,
            verify_checksums: true,
            channel_capacity: 64,
            block_size: 16,
        }
    }
}

impl FromStr for MindRecordConfig {
    type Err = MindRecordError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| MindRecordError::config_with_source("failed to parse TOML config", e))
    }
}

impl MindRecordConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MindRecordError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MINDRECORD_<SECTION>_<FIELD>` environment overrides, e.g.
    /// `MINDRECORD_WRITER_COMPRESSION=zstd` or
    /// `MINDRECORD_READER_NUM_PARALLEL_WORKERS=8`. Values that fail to parse
    /// are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = env_value::<PathBuf>("STORAGE_BASE_PATH") {
            self.storage.base_path = path;
        }
        override_from_env(&mut self.storage.buffer_size, "STORAGE_BUFFER_SIZE");
        override_from_env(&mut self.storage.use_mmap, "STORAGE_USE_MMAP");
        override_from_env(&mut self.storage.mmap_threshold, "STORAGE_MMAP_THRESHOLD");

        override_from_env(&mut self.writer.compression, "WRITER_COMPRESSION");
        override_from_env(&mut self.writer.compression_level, "WRITER_COMPRESSION_LEVEL");
        override_from_env(&mut self.writer.overwrite, "WRITER_OVERWRITE");

        let reader = &mut self.reader;
        override_from_env(&mut reader.num_parallel_workers, "READER_NUM_PARALLEL_WORKERS");
        override_from_env(&mut reader.shuffle, "READER_SHUFFLE");
        override_from_env(&mut reader.verify_checksums, "READER_VERIFY_CHECKSUMS");
        override_from_env(&mut reader.channel_capacity, "READER_CHANNEL_CAPACITY");
        override_from_env(&mut reader.block_size, "READER_BLOCK_SIZE");
        if let Some(seed) = env_value("READER_SEED") {
            reader.seed = Some(seed);
        }

        self
    }

    // Check every section.
    //
    // # Errors
    //
    // Returns a config error naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(MindRecordError::config("storage.buffer_size must be at least 1"));
        }
        if CompressionType::from_name(&self.writer.compression).is_none() {
            return Err(MindRecordError::config(format!(
                "writer.compression '{}' is not one of none, lz4, zstd",
                self.writer.compression
            )));
        }
        self.reader.validate()
    }
}

const ENV_PREFIX: &str = "MINDRECORD_";

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()?.parse().ok()
}

fn override_from_env<T: FromStr>(slot: &mut T, key: &str) {
    if let Some(value) = env_value(key) {
        *slot = value;
    }
}

impl ReaderConfig {
    /// Checks the reader section alone. `ShardReader::open` calls this for
    /// readers built without a session.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_parallel_workers", self.num_parallel_workers),
            ("channel_capacity", self.channel_capacity),
            ("block_size", self.block_size),
        ];
        match positive.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(MindRecordError::config(format!(
                "reader.{key} must be at least 1"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = MindRecordConfig::default();
        config.validate().unwrap();

        assert_eq!(config.writer.compression, "none");
        assert!(!config.writer.overwrite);
        assert_eq!(config.reader.num_parallel_workers, 1);
        assert!(!config.reader.shuffle);
        assert!(config.reader.verify_checksums);
    }

    #[test]
    fn test_sections_are_optional() {
        let config: MindRecordConfig = "[reader]\nshuffle = true\n".parse().unwrap();
        assert!(config.reader.shuffle);
        assert_eq!(config.reader.block_size, ReaderConfig::default().block_size);
        assert_eq!(config.storage.buffer_size, StorageConfig::default().buffer_size);
    }

    #[test]
    fn test_parse_every_key() {
        let toml = r#"
            [storage]
            base_path = "/data/cv"
            buffer_size = 131072
            use_mmap = false
            mmap_threshold = 2097152

            [writer]
            compression = "zstd"
            compression_level = 9
            overwrite = true

            [reader]
            num_parallel_workers = 8
            shuffle = true
            seed = 42
            verify_checksums = false
            channel_capacity = 16
            block_size = 4
        "#;
        let config: MindRecordConfig = toml.parse().unwrap();

        assert_eq!(config.storage.base_path, PathBuf::from("/data/cv"));
        assert_eq!(config.storage.mmap_threshold, 2 * 1024 * 1024);
        assert!(!config.storage.use_mmap);
        assert_eq!(config.writer.compression_level, 9);
        assert!(config.writer.overwrite);
        assert_eq!(config.reader.num_parallel_workers, 8);
        assert_eq!(config.reader.seed, Some(42));
        assert_eq!(config.reader.channel_capacity, 16);
        assert_eq!(config.reader.block_size, 4);
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        let err = "[writer\ncompression = ".parse::<MindRecordConfig>().unwrap_err();
        assert!(matches!(err, MindRecordError::Config { .. }));
    }

    #[test]
    fn test_from_file_validates() {
        let mut good = NamedTempFile::new().unwrap();
        writeln!(good, "[writer]\ncompression = \"lz4\"").unwrap();
        let config = MindRecordConfig::from_file(good.path()).unwrap();
        assert_eq!(config.writer.compression, "lz4");

        let mut bad = NamedTempFile::new().unwrap();
        writeln!(bad, "[writer]\ncompression = \"gzip\"").unwrap();
        assert!(MindRecordConfig::from_file(bad.path()).is_err());

        assert!(MindRecordConfig::from_file("/nonexistent/mindrecord.toml").is_err());
    }

    #[test]
    fn test_zero_reader_knobs_rejected() {
        for knob in 0..3 {
            let mut reader = ReaderConfig::default();
            match knob {
                0 => reader.num_parallel_workers = 0,
                1 => reader.channel_capacity = 0,
                _ => reader.block_size = 0,
            }
            let err = reader.validate().unwrap_err();
            assert!(matches!(err, MindRecordError::Config { .. }));
        }
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("MINDRECORD_READER_SEED", "1234");
        std::env::set_var("MINDRECORD_READER_BLOCK_SIZE", "not-a-number");
        std::env::set_var("MINDRECORD_READER_VERIFY_CHECKSUMS", "false");
        let config = MindRecordConfig::default().with_env_overrides();
        std::env::remove_var("MINDRECORD_READER_SEED");
        std::env::remove_var("MINDRECORD_READER_BLOCK_SIZE");
        std::env::remove_var("MINDRECORD_READER_VERIFY_CHECKSUMS");

        assert_eq!(config.reader.seed, Some(1234));
        assert_eq!(config.reader.block_size, ReaderConfig::default().block_size);
        assert!(!config.reader.verify_checksums);
    }
}
