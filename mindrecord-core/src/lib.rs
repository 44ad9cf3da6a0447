// mindrecord-core/src/lib.rs

//! MindRecord - Core Library
//!
//! This crate implements the MindRecord sharded record container: schema
//! enforcement, raw/blob field separation, multi-file sharding with a
//! companion index database, parallel readers, and the dataset-to-MindRecord
//! save pipeline.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::MindRecordConfig;
pub use error::{MindRecordError, Result};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod schema;
pub mod value;
pub use schema::{sanitize_field_name, FieldShape, FieldSpec, FieldType, Schema, SchemaId, SchemaRegistry};
pub use value::{Record, Tensor, TensorData, Value};

pub mod codec;
pub mod format;
pub use format::CompressionType;

pub mod reader;
pub mod writer;
pub use reader::{RecordStream, ShardReader};
pub use writer::{ShardSetSummary, ShardWriter};

pub mod pipeline;
pub use pipeline::{save, FileFormat, RecordSource, SaveSummary};

pub mod session;
pub use session::Session;

pub mod op_info;
