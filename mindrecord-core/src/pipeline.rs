// mindrecord-core/src/pipeline.rs

//! Dataset-to-MindRecord conversion.
//!
//! `save` drains a record source into a new shard set. The schema is
//! inferred from the first record after normalization:
//!
//! - `uint8` arrays become `bytes`
//! - `int8`, `int16` and `uint16` arrays widen to `int32`
//! - `uint32` arrays widen to `int64`
//! - field names are rewritten with [`sanitize_field_name`]
//!
//! Any failure aborts the writer, so a failed save leaves no files behind.
//!
//! # Example
//!
//! ```no_run
//! use mindrecord_core::pipeline::save;
//! use mindrecord_core::value::{Record, Value};
//!
//! let records = (0..4).map(|i| {
//!     let mut record = Record::new();
//!     record.insert("label".to_string(), Value::Int32(i));
//!     Ok(record)
//! });
//!
//! let summary = save(records, "labels.mindrecord", 1, "mindrecord").unwrap();
//! assert_eq!(summary.record_count, 4);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{StorageConfig, WriterConfig};
use crate::error::{MindRecordError, Result};
use crate::schema::{sanitize_field_name, Schema};
use crate::storage::{LocalStorage, StorageBackend};
use crate::value::Record;
use crate::writer::{validate_shard_count, ShardWriter};

/// Descriptive name stored with schemas inferred by `save`.
pub const SAVE_SCHEMA_NAME: &str = "save_schema";

/// Upstream producer of records.
///
/// Any `Iterator<Item = Result<Record>>` is a source, including a
/// [`RecordStream`](crate::reader::RecordStream).
pub trait RecordSource {
    /// Pulls the next record; `None` ends the source.
    fn next_record(&mut self) -> Option<Result<Record>>;
}

impl<I> RecordSource for I
where
    I: Iterator<Item = Result<Record>>,
{
    fn next_record(&mut self) -> Option<Result<Record>> {
        self.next()
    }
}

/// Output formats accepted by `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    MindRecord,
}

impl FromStr for FileFormat {
    type Err = MindRecordError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mindrecord" => Ok(Self::MindRecord),
            other => Err(MindRecordError::format_unsupported(other)),
        }
    }
}

/// Result of a completed save.
#[derive(Debug, Clone)]
pub struct SaveSummary {
    pub destination: PathBuf,
    pub record_count: u64,
    pub shard_files: Vec<PathBuf>,
    /// Source field name to stored field name.
    pub field_names: BTreeMap<String, String>,
}

/// Saves `source` as a MindRecord shard set through the local filesystem,
/// with default writer options.
///
/// # Errors
///
/// `FormatUnsupported` and `InvalidShardCount` are reported before any file
/// is touched; an empty source fails with `EmptySource`.
pub fn save<S: RecordSource>(
    source: S,
    destination: impl AsRef<Path>,
    num_files: usize,
    file_format: &str,
) -> Result<SaveSummary> {
    FileFormat::from_str(file_format)?;
    validate_shard_count(num_files)?;

    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&StorageConfig::default())?);
    save_with(
        storage,
        WriterConfig::default(),
        source,
        destination,
        num_files,
        file_format,
    )
}

/// Saves `source` through `storage` with the given writer options.
pub fn save_with<S: RecordSource>(
    storage: Arc<dyn StorageBackend>,
    config: WriterConfig,
    mut source: S,
    destination: impl AsRef<Path>,
    num_files: usize,
    file_format: &str,
) -> Result<SaveSummary> {
    FileFormat::from_str(file_format)?;
    validate_shard_count(num_files)?;
    let destination = destination.as_ref();

    let first = match source.next_record() {
        Some(record) => record?,
        None => return Err(MindRecordError::EmptySource),
    };
    let mut renamer = FieldRenamer::default();
    let first = renamer.normalize(first)?;
    let schema = infer_schema(&first)?;

    let mut writer = ShardWriter::open(storage, destination, num_files, config)?;
    if let Err(e) = fill(&mut writer, schema, first, &mut renamer, &mut source) {
        warn!("Save to {} failed: {}", destination.display(), e);
        if let Err(cleanup) = writer.abort() {
            warn!("Cleanup after failed save incomplete: {}", cleanup);
        }
        return Err(e);
    }

    let committed = writer.commit()?;
    let summary = SaveSummary {
        destination: destination.to_path_buf(),
        record_count: committed.record_count,
        shard_files: committed.shard_files,
        field_names: renamer.names,
    };

    info!(
        "Saved {} records to {} ({} files)",
        summary.record_count,
        summary.destination.display(),
        summary.shard_files.len()
    );
    Ok(summary)
}

fn fill<S: RecordSource>(
    writer: &mut ShardWriter,
    schema: Schema,
    first: Record,
    renamer: &mut FieldRenamer,
    source: &mut S,
) -> Result<()> {
    writer.add_schema(schema, SAVE_SCHEMA_NAME)?;
    writer.write_record(&first)?;
    while let Some(record) = source.next_record() {
        let record = renamer.normalize(record?)?;
        writer.write_record(&record)?;
    }
    Ok(())
}

/// Builds a schema from a normalized record.
pub fn infer_schema(record: &Record) -> Result<Schema> {
    let mut schema = Schema::new();
    for (name, value) in record {
        let spec = value.inferred_spec().ok_or_else(|| {
            MindRecordError::type_mismatch(name, "a storable type", value.kind())
        })?;
        schema.insert(name.clone(), spec);
    }
    Ok(schema)
}

/// Renames fields to storable names and remembers the mapping.
#[derive(Debug, Default)]
struct FieldRenamer {
    names: BTreeMap<String, String>,
}

impl FieldRenamer {
    fn normalize(&mut self, record: Record) -> Result<Record> {
        let mut out = Record::new();
        for (name, value) in record {
            let stored = match self.names.get(&name) {
                Some(stored) => stored.clone(),
                None => {
                    let stored = sanitize_field_name(&name);
                    self.names.insert(name.clone(), stored.clone());
                    stored
                }
            };

            if out.insert(stored.clone(), value.into_storable()).is_some() {
                return Err(MindRecordError::field_name(
                    &name,
                    format!("collides with another field after renaming to '{stored}'"),
                ));
            }
        }
        Ok(out)
    }
}
