// mindrecord-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MindRecordError {

    #[error("num_files should between 1 and 1000.")]
    InvalidShardCount {
        num_files: usize,
    },

    #[error("{format} dataset format is not supported.")]
    FormatUnsupported {
        format: String,
    },

    #[error("Record does not match schema: {message}")]
    SchemaMismatch {
        message: String,
    },

    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid field name '{name}': {message}")]
    FieldName {
        name: String,
        message: String,
    },

    #[error("Invalid schema field '{field}': {message}")]
    InvalidSchema {
        field: String,
        message: String,
    },

    #[error("Destination '{path}' is locked by another writer")]
    DestinationBusy {
        path: PathBuf,
    },

    #[error("Destination '{path}' already exists")]
    DestinationExists {
        path: PathBuf,
    },

    #[error("Shard set '{path}' was never committed (index database not found)")]
    NotCommitted {
        path: PathBuf,
    },

    #[error("Corrupt index '{path}': {message}")]
    CorruptIndex {
        path: PathBuf,
        message: String,
    },

    #[error("Corrupt record {record_id}: {message}")]
    CorruptRecord {
        record_id: u64,
        message: String,
    },

    #[error("Record {record_id} out of range (shard set holds {count} records)")]
    RecordOutOfRange {
        record_id: u64,
        count: u64,
    },

    #[error("Cannot infer a schema from an empty source")]
    EmptySource,

    #[error("Writer error: {message}")]
    WriterState {
        message: String,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Operator '{op_name}' registration failed: {message}")]
    OperatorRegistration {
        op_name: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, MindRecordError>;

// Convenience constructors
impl MindRecordError {

    pub fn invalid_shard_count(num_files: usize) -> Self {
        Self::InvalidShardCount { num_files }
    }

    pub fn format_unsupported(format: impl Into<String>) -> Self {
        Self::FormatUnsupported {
            format: format.into(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn field_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FieldName {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn corrupt_index(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn corrupt_record(record_id: u64, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            record_id,
            message: message.into(),
        }
    }

    pub fn writer_state(message: impl Into<String>) -> Self {
        Self::WriterState {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn operator_registration(op_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperatorRegistration {
            op_name: op_name.into(),
            message: message.into(),
        }
    }
}
