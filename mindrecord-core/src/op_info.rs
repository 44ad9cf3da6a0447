// mindrecord-core/src/op_info.rs

//! Operator descriptor registry.
//!
//! Descriptors are immutable metadata about device kernels: attributes,
//! input and output slots, and the dtype/format combinations a kernel
//! accepts. They are collected with a builder, validated once, and installed
//! into a process-wide registry.
//!
//! ```
//! use mindrecord_core::op_info::{random_choice_with_mask, OperatorRegistry};
//!
//! let registry = OperatorRegistry::builder()
//!     .register_operator(random_choice_with_mask())
//!     .unwrap()
//!     .build();
//! assert!(registry.get("RandomChoiceWithMask").is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde::Serialize;

use crate::error::{MindRecordError, Result};

/// Whether a parameter must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Required,
    Optional,
    Dynamic,
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttrValueType {
    Int,
    Float,
    Bool,
    Str,
    ListInt,
    ListFloat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    UInt8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TensorFormat {
    #[serde(rename = "DefaultFormat")]
    Default,
    #[serde(rename = "NC1HWC0")]
    Nc1hwc0,
}

/// One element of a dtype/format row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DTypeFormat {
    pub dtype: DType,
    pub format: TensorFormat,
}

impl DTypeFormat {
    pub const BOOL_DEFAULT: Self = Self::default_format(DType::Bool);
    pub const I8_DEFAULT: Self = Self::default_format(DType::Int8);
    pub const U8_DEFAULT: Self = Self::default_format(DType::UInt8);
    pub const I16_DEFAULT: Self = Self::default_format(DType::Int16);
    pub const I32_DEFAULT: Self = Self::default_format(DType::Int32);
    pub const I64_DEFAULT: Self = Self::default_format(DType::Int64);
    pub const F16_DEFAULT: Self = Self::default_format(DType::Float16);
    pub const F32_DEFAULT: Self = Self::default_format(DType::Float32);

    const fn default_format(dtype: DType) -> Self {
        Self {
            dtype,
            format: TensorFormat::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpAttr {
    pub name: String,
    pub param_type: ParamType,
    pub value_type: AttrValueType,
    pub value: String,
}

/// An input or output slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpIo {
    pub index: usize,
    pub name: String,
    pub need_compile: bool,
    pub param_type: ParamType,
    pub shape: String,
}

/// Immutable description of one operator kernel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpDescriptor {
    pub op_name: String,
    pub fusion_type: String,
    pub async_flag: bool,
    pub binfile_name: String,
    pub compute_cost: u32,
    pub kernel_name: String,
    pub partial_flag: bool,
    pub attrs: Vec<OpAttr>,
    pub inputs: Vec<OpIo>,
    pub outputs: Vec<OpIo>,
    pub dtype_formats: Vec<Vec<DTypeFormat>>,
}

impl OpDescriptor {
    /// Starts a descriptor with the given name and neutral defaults.
    pub fn new(op_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            fusion_type: "OPAQUE".to_string(),
            async_flag: false,
            binfile_name: String::new(),
            compute_cost: 10,
            kernel_name: String::new(),
            partial_flag: false,
            attrs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dtype_formats: Vec::new(),
        }
    }

    #[must_use]
    pub fn fusion_type(mut self, fusion_type: impl Into<String>) -> Self {
        self.fusion_type = fusion_type.into();
        self
    }

    #[must_use]
    pub fn async_flag(mut self, flag: bool) -> Self {
        self.async_flag = flag;
        self
    }

    #[must_use]
    pub fn binfile_name(mut self, name: impl Into<String>) -> Self {
        self.binfile_name = name.into();
        self
    }

    #[must_use]
    pub fn compute_cost(mut self, cost: u32) -> Self {
        self.compute_cost = cost;
        self
    }

    #[must_use]
    pub fn kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = name.into();
        self
    }

    #[must_use]
    pub fn partial_flag(mut self, flag: bool) -> Self {
        self.partial_flag = flag;
        self
    }

    #[must_use]
    pub fn attr(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        value_type: AttrValueType,
        value: impl Into<String>,
    ) -> Self {
        self.attrs.push(OpAttr {
            name: name.into(),
            param_type,
            value_type,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn input(
        mut self,
        index: usize,
        name: impl Into<String>,
        need_compile: bool,
        param_type: ParamType,
        shape: impl Into<String>,
    ) -> Self {
        self.inputs.push(OpIo {
            index,
            name: name.into(),
            need_compile,
            param_type,
            shape: shape.into(),
        });
        self
    }

    #[must_use]
    pub fn output(
        mut self,
        index: usize,
        name: impl Into<String>,
        need_compile: bool,
        param_type: ParamType,
        shape: impl Into<String>,
    ) -> Self {
        self.outputs.push(OpIo {
            index,
            name: name.into(),
            need_compile,
            param_type,
            shape: shape.into(),
        });
        self
    }

    /// Adds one accepted combination: inputs first, then outputs.
    #[must_use]
    pub fn dtype_format(mut self, row: &[DTypeFormat]) -> Self {
        self.dtype_formats.push(row.to_vec());
        self
    }

    /// Checks slot indices, attribute names and dtype row arity.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| MindRecordError::operator_registration(&self.op_name, message);

        if self.op_name.is_empty() {
            return Err(fail("op name is empty".to_string()));
        }

        let mut attr_names = BTreeSet::new();
        for attr in &self.attrs {
            if attr.name.is_empty() || !attr_names.insert(attr.name.as_str()) {
                return Err(fail(format!("attribute name '{}' is empty or repeated", attr.name)));
            }
        }

        check_slots("input", &self.inputs).map_err(fail)?;
        check_slots("output", &self.outputs).map_err(fail)?;

        let arity = self.inputs.len() + self.outputs.len();
        for (row, formats) in self.dtype_formats.iter().enumerate() {
            if formats.len() != arity {
                return Err(fail(format!(
                    "dtype_format row {row} has {} entries, expected {arity}",
                    formats.len()
                )));
            }
        }
        Ok(())
    }
}

fn check_slots(kind: &str, slots: &[OpIo]) -> std::result::Result<(), String> {
    let mut seen = vec![false; slots.len()];
    for slot in slots {
        match seen.get_mut(slot.index) {
            Some(taken) if !*taken => *taken = true,
            Some(_) => return Err(format!("{kind} index {} is repeated", slot.index)),
            None => {
                return Err(format!(
                    "{kind} index {} out of range for {} {kind}s",
                    slot.index,
                    slots.len()
                ))
            }
        }
    }
    Ok(())
}

/// Immutable set of validated descriptors, keyed by op name.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    ops: BTreeMap<String, OpDescriptor>,
}

impl OperatorRegistry {
    pub fn builder() -> OperatorRegistryBuilder {
        OperatorRegistryBuilder::default()
    }

    pub fn get(&self, op_name: &str) -> Option<&OpDescriptor> {
        self.ops.get(op_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct OperatorRegistryBuilder {
    ops: BTreeMap<String, OpDescriptor>,
}

impl OperatorRegistryBuilder {
    /// Validates and adds a descriptor. Op names must be unique.
    pub fn register_operator(mut self, descriptor: OpDescriptor) -> Result<Self> {
        descriptor.validate()?;
        if self.ops.contains_key(&descriptor.op_name) {
            return Err(MindRecordError::operator_registration(
                &descriptor.op_name,
                "an operator with this name is already registered",
            ));
        }
        tracing::debug!("Registered operator descriptor '{}'", descriptor.op_name);
        self.ops.insert(descriptor.op_name.clone(), descriptor);
        Ok(self)
    }

    pub fn build(self) -> OperatorRegistry {
        OperatorRegistry { ops: self.ops }
    }
}

static OPERATOR_REGISTRY: OnceLock<OperatorRegistry> = OnceLock::new();

/// Installs the process-wide registry. Fails if one is already installed.
pub fn init_operator_registry(registry: OperatorRegistry) -> Result<()> {
    OPERATOR_REGISTRY.set(registry).map_err(|_| {
        MindRecordError::operator_registration("<registry>", "operator registry already initialized")
    })
}

/// The process-wide registry, once installed.
pub fn operator_registry() -> Option<&'static OperatorRegistry> {
    OPERATOR_REGISTRY.get()
}

/// Descriptor of the `RandomChoiceWithMask` kernel.
pub fn random_choice_with_mask() -> OpDescriptor {
    OpDescriptor::new("RandomChoiceWithMask")
        .fusion_type("OPAQUE")
        .async_flag(false)
        .binfile_name("random_choice_with_mask.so")
        .compute_cost(10)
        .kernel_name("random_choice_with_mask")
        .partial_flag(true)
        .attr("max_shape", ParamType::Optional, AttrValueType::ListInt, "all")
        .attr("means", ParamType::Optional, AttrValueType::ListFloat, "all")
        .attr("stds", ParamType::Optional, AttrValueType::ListFloat, "all")
        .attr("wh_ratio_clip", ParamType::Optional, AttrValueType::Float, "all")
        .input(0, "rois", false, ParamType::Required, "all")
        .input(1, "deltas", false, ParamType::Required, "all")
        .output(0, "bboxes", false, ParamType::Required, "all")
        .dtype_format(&[
            DTypeFormat::F16_DEFAULT,
            DTypeFormat::F16_DEFAULT,
            DTypeFormat::F16_DEFAULT,
        ])
        .dtype_format(&[
            DTypeFormat::F32_DEFAULT,
            DTypeFormat::F32_DEFAULT,
            DTypeFormat::F32_DEFAULT,
        ])
}
