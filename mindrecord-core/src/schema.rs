// mindrecord-core/src/schema.rs

//! Schema registry for MindRecord shard sets.
//!
//! A schema maps field names to a primitive type and a shape marker. Only
//! scalars and variable-length 1-D arrays (`[-1]`) are declarable; `bytes`
//! and `string` fields are always scalar-shaped opaque values.
//!
//! Field names are restricted to `[A-Za-z0-9_]`. Upstream names that carry
//! punctuation or spaces are rewritten with [`sanitize_field_name`] before
//! registration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MindRecordError, Result};

/// Primitive types a field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
}

impl FieldType {
    /// Parses a type name as used in schema descriptions.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            "string" => Some(Self::String),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    /// Width in bytes of one element, for fixed-width numeric types.
    pub fn element_width(self) -> Option<usize> {
        match self {
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::String | Self::Bytes => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.element_width().is_some()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape marker of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldShape {
    /// No shape declared.
    Scalar,
    /// Declared as `[-1]`.
    Variable,
}

/// Declaration of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub shape: FieldShape,
}

impl FieldSpec {
    pub fn scalar(field_type: FieldType) -> Self {
        Self {
            field_type,
            shape: FieldShape::Scalar,
        }
    }

    pub fn array(field_type: FieldType) -> Self {
        Self {
            field_type,
            shape: FieldShape::Variable,
        }
    }

    /// Whether the value is stored in the blob section.
    pub fn is_blob(&self) -> bool {
        self.field_type == FieldType::Bytes || self.shape == FieldShape::Variable
    }

    /// Human readable form used in error messages, e.g. `int64[-1]`.
    pub fn describe(&self) -> String {
        match self.shape {
            FieldShape::Scalar => self.field_type.name().to_string(),
            FieldShape::Variable => format!("{}[-1]", self.field_type.name()),
        }
    }
}

/// Field declarations of a record set, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style. Validation happens at registration.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) -> Option<FieldSpec> {
        self.fields.insert(name.into(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in encoding order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Parses a JSON schema description, one object per field:
    ///
    /// ```text
    /// {"file_name": {"type": "string"}, "ids": {"type": "int64", "shape": [-1]}}
    /// ```
    pub fn from_json(description: &str) -> Result<Self> {
        let raw: BTreeMap<String, FieldDescription> = serde_json::from_str(description)
            .map_err(|e| MindRecordError::serialization(format!("invalid schema description: {e}")))?;

        let mut schema = Schema::new();
        for (name, desc) in raw {
            let spec = desc.into_spec(&name)?;
            schema.insert(name, spec);
        }
        Ok(schema)
    }

    /// Checks field names and declarations.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(MindRecordError::invalid_schema(
                "<schema>",
                "schema must declare at least one field",
            ));
        }

        for (name, spec) in &self.fields {
            validate_field_name(name)?;

            if spec.shape == FieldShape::Variable && !spec.field_type.is_numeric() {
                return Err(MindRecordError::invalid_schema(
                    name,
                    format!("{} fields cannot declare a shape", spec.field_type),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FieldDescription {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    shape: Option<Vec<i64>>,
}

impl FieldDescription {
    fn into_spec(self, field: &str) -> Result<FieldSpec> {
        let field_type = FieldType::from_name(&self.type_name).ok_or_else(|| {
            MindRecordError::invalid_schema(
                field,
                format!("unsupported type '{}'", self.type_name),
            )
        })?;

        let shape = match self.shape.as_deref() {
            None => FieldShape::Scalar,
            Some([-1]) => FieldShape::Variable,
            Some(other) => {
                return Err(MindRecordError::invalid_schema(
                    field,
                    format!("unsupported shape {other:?}, only [-1] is allowed"),
                ))
            }
        };

        Ok(FieldSpec { field_type, shape })
    }
}

/// Rewrites every character outside `[A-Za-z0-9_]` to `_`, one `_` per
/// character. Idempotent.
pub fn sanitize_field_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Validates a field name against `[A-Za-z0-9_]+`.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MindRecordError::field_name(name, "name is empty"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(MindRecordError::field_name(
            name,
            format!("character {bad:?} is not allowed"),
        ));
    }
    Ok(())
}

/// Identifier of a registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId(pub u32);

#[derive(Debug, Clone)]
struct RegisteredSchema {
    name: String,
    schema: Schema,
}

/// Validates and stores schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: Vec<RegisteredSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `schema` and stores it under a descriptive `name`.
    pub fn register(&mut self, schema: Schema, name: &str) -> Result<SchemaId> {
        if name.trim().is_empty() {
            return Err(MindRecordError::invalid_schema(
                "<schema>",
                "schema name must not be empty",
            ));
        }
        schema.validate()?;

        let id = SchemaId(self.entries.len() as u32);
        tracing::debug!("Registered schema '{}' as {:?} ({} fields)", name, id, schema.len());
        self.entries.push(RegisteredSchema {
            name: name.to_string(),
            schema,
        });
        Ok(id)
    }

    pub fn get(&self, id: SchemaId) -> Option<&Schema> {
        self.entries.get(id.0 as usize).map(|e| &e.schema)
    }

    pub fn name(&self, id: SchemaId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
