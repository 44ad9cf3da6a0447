// mindrecord-core/src/value.rs

//! Runtime values carried by records.
//!
//! Upstream sources produce heterogeneous field values; they are modelled as
//! a tagged [`Value`] and checked against the declared [`FieldSpec`] at
//! encode time.
//!
//! [`FieldSpec`]: crate::schema::FieldSpec

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{MindRecordError, Result};
use crate::schema::{FieldSpec, FieldType};

/// One logical record: field name to value.
pub type Record = BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Tensor),
}

impl Value {
    /// Short type description for error messages.
    pub fn kind(&self) -> String {
        match self {
            Value::Int32(_) => "int32".to_string(),
            Value::Int64(_) => "int64".to_string(),
            Value::Float32(_) => "float32".to_string(),
            Value::Float64(_) => "float64".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Array(t) => format!("{}{:?}", t.data.dtype(), t.shape),
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Array(t) => Some(t),
            _ => None,
        }
    }

    /// Rewrites element types the container cannot hold natively.
    ///
    /// `uint8` arrays become `bytes` (their shape is not retained), narrow
    /// integers widen to `int32`, and `uint32` widens to `int64`. Everything
    /// else is returned unchanged.
    pub fn into_storable(self) -> Value {
        let Value::Array(tensor) = self else {
            return self;
        };
        let Tensor { shape, data } = tensor;
        let data = match data {
            TensorData::UInt8(v) => return Value::Bytes(v),
            TensorData::Int8(v) => TensorData::Int32(v.into_iter().map(i32::from).collect()),
            TensorData::Int16(v) => TensorData::Int32(v.into_iter().map(i32::from).collect()),
            TensorData::UInt16(v) => TensorData::Int32(v.into_iter().map(i32::from).collect()),
            TensorData::UInt32(v) => TensorData::Int64(v.into_iter().map(i64::from).collect()),
            other => other,
        };
        Value::Array(Tensor { shape, data })
    }

    /// The field declaration a storable value maps to when a schema is
    /// inferred from data.
    pub fn inferred_spec(&self) -> Option<FieldSpec> {
        let spec = match self {
            Value::Int32(_) => FieldSpec::scalar(FieldType::Int32),
            Value::Int64(_) => FieldSpec::scalar(FieldType::Int64),
            Value::Float32(_) => FieldSpec::scalar(FieldType::Float32),
            Value::Float64(_) => FieldSpec::scalar(FieldType::Float64),
            Value::String(_) => FieldSpec::scalar(FieldType::String),
            Value::Bytes(_) => FieldSpec::scalar(FieldType::Bytes),
            Value::Array(t) => match t.data.field_type()? {
                FieldType::Bytes => FieldSpec::scalar(FieldType::Bytes),
                numeric => FieldSpec::array(numeric),
            },
        };
        Some(spec)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Array(v)
    }
}

/// Typed element storage of a tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum TensorData {
    UInt8(Vec<u8>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::UInt8(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::UInt16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::UInt32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            TensorData::UInt8(_) => "uint8",
            TensorData::Int8(_) => "int8",
            TensorData::Int16(_) => "int16",
            TensorData::UInt16(_) => "uint16",
            TensorData::Int32(_) => "int32",
            TensorData::UInt32(_) => "uint32",
            TensorData::Int64(_) => "int64",
            TensorData::Float32(_) => "float32",
            TensorData::Float64(_) => "float64",
        }
    }

    /// The schema type this element type is stored as, if it is storable
    /// without normalization.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            TensorData::Int32(_) => Some(FieldType::Int32),
            TensorData::Int64(_) => Some(FieldType::Int64),
            TensorData::Float32(_) => Some(FieldType::Float32),
            TensorData::Float64(_) => Some(FieldType::Float64),
            TensorData::UInt8(_) => Some(FieldType::Bytes),
            _ => None,
        }
    }
}

/// An n-dimensional array in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    #[serde(flatten)]
    pub data: TensorData,
}

impl Tensor {
    /// Creates a tensor, checking that `shape` covers exactly `data.len()`
    /// elements.
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let Some(expected) = element_count(&shape) else {
            return Err(MindRecordError::serialization(format!(
                "shape {shape:?} overflows the element count"
            )));
        };
        if expected != data.len() {
            return Err(MindRecordError::serialization(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Whether `shape` covers exactly the stored elements.
    pub fn is_well_formed(&self) -> bool {
        element_count(&self.shape) == Some(self.data.len())
    }

    /// Creates a 1-D tensor.
    pub fn vector(data: TensorData) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Number of elements a row-major `shape` holds, or `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldShape;

    #[test]
    fn test_tensor_shape_must_match_len() {
        assert!(Tensor::new(vec![2, 2], TensorData::Int32(vec![1, 2, 3, 4])).is_ok());
        assert!(Tensor::new(vec![3], TensorData::Int32(vec![1, 2])).is_err());

        let v = Tensor::vector(TensorData::Float64(vec![1.0, 2.0, 3.0]));
        assert_eq!(v.shape, vec![3]);
    }

    #[test]
    fn test_huge_shape_is_an_error_not_a_panic() {
        let shape = vec![usize::MAX, 2, 3];
        assert_eq!(element_count(&shape), None);
        let err = Tensor::new(shape, TensorData::Int8(vec![1])).unwrap_err();
        assert!(matches!(err, MindRecordError::Serialization { .. }));

        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[4, 0, 7]), Some(0));
    }

    #[test]
    fn test_into_storable_widens_narrow_integers() {
        let t = Tensor::new(vec![2, 1], TensorData::Int8(vec![-3, 4])).unwrap();
        let stored = Value::Array(t).into_storable();
        assert_eq!(
            stored,
            Value::Array(Tensor::new(vec![2, 1], TensorData::Int32(vec![-3, 4])).unwrap())
        );

        let t = Tensor::vector(TensorData::UInt32(vec![u32::MAX]));
        let stored = Value::Array(t).into_storable();
        assert_eq!(
            stored.as_tensor().unwrap().data,
            TensorData::Int64(vec![u32::MAX as i64])
        );
    }

    #[test]
    fn test_into_storable_uint8_becomes_bytes() {
        let t = Tensor::new(vec![2, 2], TensorData::UInt8(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(Value::Array(t).into_storable(), Value::Bytes(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_into_storable_keeps_float32() {
        let t = Tensor::vector(TensorData::Float32(vec![1.2, 2.78]));
        let stored = Value::Array(t.clone()).into_storable();
        assert_eq!(stored, Value::Array(t));
    }

    #[test]
    fn test_inferred_spec() {
        assert_eq!(
            Value::from("001.jpg").inferred_spec(),
            Some(FieldSpec::scalar(FieldType::String))
        );
        let spec = Value::Array(Tensor::vector(TensorData::Int64(vec![1])))
            .inferred_spec()
            .unwrap();
        assert_eq!(spec.field_type, FieldType::Int64);
        assert_eq!(spec.shape, FieldShape::Variable);

        let raw = Value::Array(Tensor::vector(TensorData::Int16(vec![1])));
        assert_eq!(raw.inferred_spec(), None);
    }

    #[test]
    fn test_json_rendering() {
        let mut record = Record::new();
        record.insert("label".to_string(), Value::Int32(43));
        record.insert(
            "ids".to_string(),
            Value::Array(Tensor::vector(TensorData::Int64(vec![1, 2]))),
        );

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"ids":{"shape":[2],"dtype":"int64","values":[1,2]},"label":43}"#
        );
    }
}
