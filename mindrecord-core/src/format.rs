// mindrecord-core/src/format.rs

//! On-disk layout of a shard set.
//!
//! A shard set named `<name>` consists of one or more data files and one
//! index database:
//!
//! ```text
//! <name>            (num_files == 1)
//! <name>0..<name>N  (num_files > 1)
//! <name>.db         index database, written last; its presence marks commit
//! ```
//!
//! ## Data file
//!
//! ```text
//! +----------------------------+
//! | Magic "MRS1" (4 bytes)     |
//! | Version (4 bytes)          |
//! | Shard id (4 bytes)         |
//! | Shard count (4 bytes)      |
//! | Flags (4 bytes)            |  <- compression
//! | Reserved (12 bytes)        |
//! +----------------------------+
//! | Record frame               |  record_id u64 | raw_len u32 | blob_len u32
//! |   raw section              |
//! |   blob section (stored)    |  <- compressed per flags
//! +----------------------------+
//! | ...                        |
//! +----------------------------+
//! ```
//!
//! ## Index database
//!
//! ```text
//! +----------------------------+
//! | Magic "MRDB" (4 bytes)     |
//! | Version (4 bytes)          |
//! | Body length (8 bytes)      |
//! | Body checksum (8 bytes)    |  <- XXHash64 of body
//! +----------------------------+
//! | Body (bincode)             |  <- IndexDatabase
//! +----------------------------+
//! ```
//!
//! All integers are little-endian.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::{MindRecordError, Result};
use crate::schema::Schema;

/// Magic bytes for shard data files.
pub const SHARD_MAGIC: [u8; 4] = *b"MRS1";

/// Magic bytes for the index database.
pub const INDEX_MAGIC: [u8; 4] = *b"MRDB";

/// Current format version of both file kinds.
pub const FORMAT_VERSION: u32 = 1;

/// Shard header size in bytes.
pub const SHARD_HEADER_SIZE: usize = 32;

/// Record frame header size: record id, raw length, blob length.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Index preamble size: magic, version, body length, checksum.
pub const INDEX_PREAMBLE_SIZE: usize = 24;

/// Smallest and largest number of data files in one shard set.
pub const MIN_SHARDS: usize = 1;
pub const MAX_SHARDS: usize = 1000;

/// Flag: blob sections are LZ4 compressed.
pub const FLAG_COMPRESSION_LZ4: u32 = 0x0001;

/// Flag: blob sections are ZSTD compressed.
pub const FLAG_COMPRESSION_ZSTD: u32 = 0x0002;

/// Compression mask (lower 2 bits).
pub const FLAG_COMPRESSION_MASK: u32 = 0x0003;

/// Compression applied to blob sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "lz4" => Some(Self::Lz4),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    pub fn to_flag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Lz4 => FLAG_COMPRESSION_LZ4,
            Self::Zstd => FLAG_COMPRESSION_ZSTD,
        }
    }

    pub fn from_flag(flags: u32) -> Option<Self> {
        match flags & FLAG_COMPRESSION_MASK {
            0 => Some(Self::None),
            FLAG_COMPRESSION_LZ4 => Some(Self::Lz4),
            FLAG_COMPRESSION_ZSTD => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn compress(self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, level)
                .map_err(|e| MindRecordError::serialization(format!("zstd compression failed: {e}"))),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| MindRecordError::serialization(format!("lz4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| MindRecordError::serialization(format!("zstd decompression failed: {e}"))),
        }
    }
}

/// Fixed-size header at the start of every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub shard_id: u32,
    pub shard_count: u32,
    pub flags: u32,
}

impl ShardHeader {
    pub fn new(shard_id: u32, shard_count: u32, compression: CompressionType) -> Self {
        Self {
            magic: SHARD_MAGIC,
            version: FORMAT_VERSION,
            shard_id,
            shard_count,
            flags: compression.to_flag(),
        }
    }

    pub fn compression(&self) -> Option<CompressionType> {
        CompressionType::from_flag(self.flags)
    }

    pub fn to_bytes(&self) -> [u8; SHARD_HEADER_SIZE] {
        let mut bytes = [0u8; SHARD_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.shard_id.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.shard_count.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.flags.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SHARD_HEADER_SIZE {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);

        Some(Self {
            magic,
            version: read_u32(bytes, 4),
            shard_id: read_u32(bytes, 8),
            shard_count: read_u32(bytes, 12),
            flags: read_u32(bytes, 16),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.magic == SHARD_MAGIC && self.version == FORMAT_VERSION
    }
}

/// Header preceding each record's sections in a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub record_id: u64,
    pub raw_len: u32,
    pub blob_len: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.record_id.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.raw_len.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.blob_len.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            record_id: read_u64(bytes, 0),
            raw_len: read_u32(bytes, 8),
            blob_len: read_u32(bytes, 12),
        })
    }
}

/// Location of one record inside the shard set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub record_id: u64,
    pub shard: u32,
    /// Offset of the frame header.
    pub frame_offset: u64,
    pub raw_offset: u64,
    pub raw_len: u32,
    pub blob_offset: u64,
    pub blob_len: u32,
    /// XXHash64 over the raw section followed by the stored blob section.
    pub checksum: u64,
}

impl IndexEntry {
    /// One past the last byte of the record frame.
    pub fn end_offset(&self) -> u64 {
        self.blob_offset + u64::from(self.blob_len)
    }
}

/// Per data file summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFileMeta {
    /// File name relative to the directory holding the index.
    pub file_name: String,
    pub record_count: u64,
    pub byte_len: u64,
}

/// Body of the index database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDatabase {
    pub schema_name: String,
    pub schema: Schema,
    pub compression: CompressionType,
    pub shard_files: Vec<ShardFileMeta>,
    /// Entries in record id (write) order.
    pub entries: Vec<IndexEntry>,
}

impl IndexDatabase {
    pub fn record_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Serializes the database with its preamble.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| MindRecordError::serialization(format!("failed to serialize index: {e}")))?;

        let mut out = Vec::with_capacity(INDEX_PREAMBLE_SIZE + body.len());
        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&checksum(&[&body]).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parses and verifies an index file read from `path`.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_PREAMBLE_SIZE {
            return Err(MindRecordError::corrupt_index(path, "index file too small"));
        }
        if bytes[0..4] != INDEX_MAGIC {
            return Err(MindRecordError::corrupt_index(
                path,
                format!("invalid magic bytes: expected {:?}, got {:?}", INDEX_MAGIC, &bytes[0..4]),
            ));
        }
        let version = read_u32(bytes, 4);
        if version != FORMAT_VERSION {
            return Err(MindRecordError::corrupt_index(
                path,
                format!("unsupported version: expected {FORMAT_VERSION}, got {version}"),
            ));
        }

        let body_len = read_u64(bytes, 8);
        let expected_checksum = read_u64(bytes, 16);
        let body = &bytes[INDEX_PREAMBLE_SIZE..];
        if body.len() as u64 != body_len {
            return Err(MindRecordError::corrupt_index(
                path,
                format!("body length mismatch: expected {}, got {}", body_len, body.len()),
            ));
        }

        let computed = checksum(&[body]);
        if computed != expected_checksum {
            return Err(MindRecordError::corrupt_index(
                path,
                format!("checksum mismatch: expected {expected_checksum}, got {computed}"),
            ));
        }

        bincode::deserialize(body)
            .map_err(|e| MindRecordError::corrupt_index(path, format!("failed to deserialize index: {e}")))
    }
}

/// XXHash64 over the concatenation of `parts`.
pub fn checksum(parts: &[&[u8]]) -> u64 {
    use std::hash::Hasher;
    let mut hasher = XxHash64::with_seed(0);
    for part in parts {
        hasher.write(part);
    }
    hasher.finish()
}

/// Data file paths of a shard set, in shard order.
pub fn shard_paths(path: &Path, num_files: usize) -> Vec<PathBuf> {
    if num_files == 1 {
        return vec![path.to_path_buf()];
    }
    (0..num_files).map(|i| with_suffix(path, &i.to_string())).collect()
}

/// Path of the index database of a shard set.
pub fn index_path(path: &Path) -> PathBuf {
    with_suffix(path, ".db")
}

/// Path of the writer lock marker of a shard set.
pub fn lock_path(path: &Path) -> PathBuf {
    with_suffix(path, ".lock")
}

/// Temporary path the index is staged at before the committing rename.
pub fn staging_index_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.db.tmp"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};

    fn sample_index() -> IndexDatabase {
        IndexDatabase {
            schema_name: "schema".to_string(),
            schema: Schema::new().with_field("label", FieldSpec::scalar(FieldType::Int32)),
            compression: CompressionType::None,
            shard_files: vec![ShardFileMeta {
                file_name: "set.mindrecord".to_string(),
                record_count: 1,
                byte_len: 52,
            }],
            entries: vec![IndexEntry {
                record_id: 0,
                shard: 0,
                frame_offset: 32,
                raw_offset: 48,
                raw_len: 4,
                blob_offset: 52,
                blob_len: 0,
                checksum: 7,
            }],
        }
    }

    #[test]
    fn test_shard_header_roundtrip() {
        let header = ShardHeader::new(3, 8, CompressionType::Zstd);
        let parsed = ShardHeader::from_bytes(&header.to_bytes()).unwrap();

        assert_eq!(parsed, header);
        assert!(parsed.is_valid());
        assert_eq!(parsed.compression(), Some(CompressionType::Zstd));
        assert!(ShardHeader::from_bytes(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_compression_roundtrip() {
        let data = b"blob blob blob blob blob blob blob blob".to_vec();
        for c in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
            let stored = c.compress(&data, 3).unwrap();
            assert_eq!(c.decompress(&stored).unwrap(), data, "{}", c.name());
            assert_eq!(CompressionType::from_flag(c.to_flag()), Some(c));
            assert_eq!(CompressionType::from_name(c.name()), Some(c));
        }
        assert_eq!(CompressionType::from_name("gzip"), None);
    }

    #[test]
    fn test_index_roundtrip_and_checksum() {
        let index = sample_index();
        let bytes = index.to_bytes().unwrap();
        let parsed = IndexDatabase::from_bytes(Path::new("set.db"), &bytes).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.record_count(), 1);

        let mut corrupt = bytes.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let err = IndexDatabase::from_bytes(Path::new("set.db"), &corrupt).unwrap_err();
        assert!(matches!(err, MindRecordError::CorruptIndex { .. }));
    }

    #[test]
    fn test_index_rejects_bad_magic_and_short_input() {
        let mut bytes = sample_index().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(IndexDatabase::from_bytes(Path::new("set.db"), &bytes)
            .unwrap_err()
            .to_string()
            .contains("magic"));

        assert!(IndexDatabase::from_bytes(Path::new("set.db"), b"MRDB").is_err());
    }

    #[test]
    fn test_paths() {
        let base = Path::new("/data/temp.mindrecord");
        assert_eq!(shard_paths(base, 1), vec![PathBuf::from("/data/temp.mindrecord")]);
        assert_eq!(
            shard_paths(base, 3),
            vec![
                PathBuf::from("/data/temp.mindrecord0"),
                PathBuf::from("/data/temp.mindrecord1"),
                PathBuf::from("/data/temp.mindrecord2"),
            ]
        );
        assert_eq!(index_path(base), PathBuf::from("/data/temp.mindrecord.db"));
        assert_eq!(lock_path(base), PathBuf::from("/data/temp.mindrecord.lock"));
        assert_eq!(
            staging_index_path(base),
            PathBuf::from("/data/.temp.mindrecord.db.tmp")
        );
    }

    #[test]
    fn test_frame_header_roundtrip() {
        let frame = FrameHeader {
            record_id: 42,
            raw_len: 10,
            blob_len: 20,
        };
        assert_eq!(FrameHeader::from_bytes(&frame.to_bytes()), Some(frame));
    }
}
