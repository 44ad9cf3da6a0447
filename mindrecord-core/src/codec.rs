// mindrecord-core/src/codec.rs

//! Record encoder.
//!
//! A record is split into two sections, walking the schema in field order:
//!
//! ```text
//! raw section                         blob section
//! +-------------------------------+   +-----------------------------------+
//! | int32/float32: 4 bytes LE     |   | per bytes / [-1] field:           |
//! | int64/float64: 8 bytes LE     |   |   ndim      u32 LE                |
//! | string: len u32 LE + UTF-8    |   |   dims      ndim x u64 LE         |
//! +-------------------------------+   |   byte_len  u64 LE                |
//!                                     |   payload   elements, LE          |
//!                                     +-----------------------------------+
//! ```
//!
//! `bytes` fields are written with a single dimension and decode as a 1-D
//! `uint8` tensor. Any rank the caller attached to a byte array is not
//! retained; this is a property of the container, not a decode bug.

use crate::error::{MindRecordError, Result};
use crate::schema::{FieldShape, FieldSpec, FieldType, Schema};
use crate::value::{Record, Tensor, TensorData, Value};

/// Encoded form of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedRecord {
    pub raw: Vec<u8>,
    pub blob: Vec<u8>,
}

/// Encodes `record` under `schema`.
///
/// # Errors
///
/// - `SchemaMismatch` if the record carries an undeclared field or omits a
///   declared one.
/// - `TypeMismatch` if a value cannot be coerced to its declared type.
pub fn encode(schema: &Schema, record: &Record) -> Result<EncodedRecord> {
    if let Some(extra) = record.keys().find(|name| !schema.contains(name)) {
        return Err(MindRecordError::schema_mismatch(format!(
            "field '{extra}' is not declared in the schema"
        )));
    }

    let mut out = EncodedRecord::default();
    for (name, spec) in schema.fields() {
        let value = record.get(name).ok_or_else(|| {
            MindRecordError::schema_mismatch(format!("required field '{name}' is missing"))
        })?;

        if spec.field_type == FieldType::Bytes {
            encode_bytes(name, value, &mut out.blob)?;
        } else if spec.shape == FieldShape::Variable {
            encode_array(name, spec, value, &mut out.blob)?;
        } else {
            encode_scalar(name, spec.field_type, value, &mut out.raw)?;
        }
    }
    Ok(out)
}

fn mismatch(name: &str, spec: &FieldSpec, value: &Value) -> MindRecordError {
    MindRecordError::type_mismatch(name, spec.describe(), value.kind())
}

fn encode_scalar(name: &str, field_type: FieldType, value: &Value, raw: &mut Vec<u8>) -> Result<()> {
    let spec = FieldSpec::scalar(field_type);
    match (field_type, value) {
        (FieldType::Int32, Value::Int32(v)) => raw.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Int32, Value::Int64(v)) => {
            let v = i32::try_from(*v).map_err(|_| {
                MindRecordError::type_mismatch(name, "int32", format!("int64 {v} out of range"))
            })?;
            raw.extend_from_slice(&v.to_le_bytes());
        }
        (FieldType::Int64, Value::Int32(v)) => raw.extend_from_slice(&i64::from(*v).to_le_bytes()),
        (FieldType::Int64, Value::Int64(v)) => raw.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Float32, Value::Float32(v)) => raw.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Float32, Value::Float64(v)) => {
            raw.extend_from_slice(&(*v as f32).to_le_bytes())
        }
        (FieldType::Float64, Value::Float32(v)) => {
            raw.extend_from_slice(&f64::from(*v).to_le_bytes())
        }
        (FieldType::Float64, Value::Float64(v)) => raw.extend_from_slice(&v.to_le_bytes()),
        (FieldType::String, Value::String(s)) => {
            let len = u32::try_from(s.len()).map_err(|_| {
                MindRecordError::type_mismatch(name, "string", "string longer than 4 GiB")
            })?;
            raw.extend_from_slice(&len.to_le_bytes());
            raw.extend_from_slice(s.as_bytes());
        }
        _ => return Err(mismatch(name, &spec, value)),
    }
    Ok(())
}

fn encode_bytes(name: &str, value: &Value, blob: &mut Vec<u8>) -> Result<()> {
    let bytes: &[u8] = match value {
        Value::Bytes(b) => b,
        Value::Array(tensor @ Tensor {
            data: TensorData::UInt8(b),
            ..
        }) => {
            if !tensor.is_well_formed() {
                return Err(MindRecordError::type_mismatch(
                    name,
                    "bytes",
                    format!("uint8 tensor of shape {:?} holding {} elements", tensor.shape, b.len()),
                ));
            }
            b
        }
        _ => return Err(mismatch(name, &FieldSpec::scalar(FieldType::Bytes), value)),
    };
    write_frame(blob, &[bytes.len()], bytes);
    Ok(())
}

fn encode_array(name: &str, spec: &FieldSpec, value: &Value, blob: &mut Vec<u8>) -> Result<()> {
    let Value::Array(tensor) = value else {
        return Err(mismatch(name, spec, value));
    };
    if !tensor.is_well_formed() {
        return Err(MindRecordError::type_mismatch(
            name,
            spec.describe(),
            format!("tensor of shape {:?} holding {} elements", tensor.shape, tensor.len()),
        ));
    }

    let payload: Vec<u8> = match (spec.field_type, &tensor.data) {
        (FieldType::Int32, TensorData::Int32(v)) => le_bytes(v, |x| x.to_le_bytes()),
        (FieldType::Int64, TensorData::Int64(v)) => le_bytes(v, |x| x.to_le_bytes()),
        (FieldType::Int64, TensorData::Int32(v)) => le_bytes(v, |x| i64::from(x).to_le_bytes()),
        (FieldType::Float32, TensorData::Float32(v)) => le_bytes(v, |x| x.to_le_bytes()),
        (FieldType::Float64, TensorData::Float64(v)) => le_bytes(v, |x| x.to_le_bytes()),
        (FieldType::Float64, TensorData::Float32(v)) => {
            le_bytes(v, |x| f64::from(x).to_le_bytes())
        }
        _ => return Err(mismatch(name, spec, value)),
    };

    write_frame(blob, &tensor.shape, &payload);
    Ok(())
}

fn le_bytes<T: Copy, const N: usize>(values: &[T], f: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * N);
    for v in values {
        out.extend_from_slice(&f(*v));
    }
    out
}

fn write_frame(blob: &mut Vec<u8>, shape: &[usize], payload: &[u8]) {
    blob.extend_from_slice(&(shape.len() as u32).to_le_bytes());
    for dim in shape {
        blob.extend_from_slice(&(*dim as u64).to_le_bytes());
    }
    blob.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    blob.extend_from_slice(payload);
}

/// Decodes a record previously produced by [`encode`] under the same schema.
///
/// # Errors
///
/// Returns `Serialization` if either section is truncated, carries trailing
/// bytes, or is internally inconsistent.
pub fn decode(schema: &Schema, raw: &[u8], blob: &[u8]) -> Result<Record> {
    let mut raw = Cursor::new(raw, "raw");
    let mut blob = Cursor::new(blob, "blob");
    let mut record = Record::new();

    for (name, spec) in schema.fields() {
        let value = if spec.field_type == FieldType::Bytes {
            let (shape, payload) = blob.read_frame()?;
            if shape.len() != 1 || shape[0] != payload.len() {
                return Err(MindRecordError::serialization(format!(
                    "bytes field '{name}' has inconsistent frame shape {shape:?}"
                )));
            }
            Value::Array(Tensor::vector(TensorData::UInt8(payload.to_vec())))
        } else if spec.shape == FieldShape::Variable {
            let (shape, payload) = blob.read_frame()?;
            Value::Array(decode_array(name, spec.field_type, shape, payload)?)
        } else {
            decode_scalar(spec.field_type, &mut raw)?
        };
        record.insert(name.to_string(), value);
    }

    raw.expect_end()?;
    blob.expect_end()?;
    Ok(record)
}

fn decode_scalar(field_type: FieldType, raw: &mut Cursor<'_>) -> Result<Value> {
    let value = match field_type {
        FieldType::Int32 => Value::Int32(i32::from_le_bytes(raw.read_array()?)),
        FieldType::Int64 => Value::Int64(i64::from_le_bytes(raw.read_array()?)),
        FieldType::Float32 => Value::Float32(f32::from_le_bytes(raw.read_array()?)),
        FieldType::Float64 => Value::Float64(f64::from_le_bytes(raw.read_array()?)),
        FieldType::String => {
            let len = u32::from_le_bytes(raw.read_array()?) as usize;
            let bytes = raw.read_bytes(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| MindRecordError::serialization(format!("invalid UTF-8 string: {e}")))?;
            Value::String(s.to_string())
        }
        FieldType::Bytes => unreachable!("bytes fields are stored in the blob section"),
    };
    Ok(value)
}

fn decode_array(name: &str, field_type: FieldType, shape: Vec<usize>, payload: &[u8]) -> Result<Tensor> {
    let width = field_type
        .element_width()
        .ok_or_else(|| MindRecordError::serialization(format!("field '{name}' is not numeric")))?;
    if payload.len() % width != 0 {
        return Err(MindRecordError::serialization(format!(
            "array field '{name}' payload of {} bytes is not a multiple of {width}",
            payload.len()
        )));
    }

    let data = match field_type {
        FieldType::Int32 => TensorData::Int32(from_le(payload, i32::from_le_bytes)),
        FieldType::Int64 => TensorData::Int64(from_le(payload, i64::from_le_bytes)),
        FieldType::Float32 => TensorData::Float32(from_le(payload, f32::from_le_bytes)),
        FieldType::Float64 => TensorData::Float64(from_le(payload, f64::from_le_bytes)),
        FieldType::String | FieldType::Bytes => unreachable!("checked by element_width"),
    };
    Tensor::new(shape, data)
}

fn from_le<T, const N: usize>(payload: &[u8], f: fn([u8; N]) -> T) -> Vec<T> {
    payload
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            f(buf)
        })
        .collect()
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], section: &'static str) -> Self {
        Self { buf, pos: 0, section }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(MindRecordError::serialization(format!(
                "{} section truncated: need {} bytes at offset {}, have {}",
                self.section,
                len,
                self.pos,
                self.buf.len() - self.pos
            )));
        };
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u64_len(&mut self) -> Result<usize> {
        let v = u64::from_le_bytes(self.read_array()?);
        usize::try_from(v)
            .map_err(|_| MindRecordError::serialization(format!("length {v} exceeds address space")))
    }

    fn read_frame(&mut self) -> Result<(Vec<usize>, &'a [u8])> {
        let ndim = u32::from_le_bytes(self.read_array()?) as usize;
        // Each dim needs 8 bytes; reject absurd ranks before allocating.
        if ndim > (self.buf.len() - self.pos) / 8 {
            return Err(MindRecordError::serialization(format!(
                "{} section frame declares {ndim} dimensions",
                self.section
            )));
        }
        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            shape.push(self.read_u64_len()?);
        }
        let byte_len = self.read_u64_len()?;
        let payload = self.read_bytes(byte_len)?;
        Ok((shape, payload))
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(MindRecordError::serialization(format!(
                "{} section has {} trailing bytes",
                self.section,
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}
