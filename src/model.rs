//! Interchange-format model document, in the protobuf JSON encoding
//! (camelCase field names, 64-bit integers as numbers or strings, bytes as
//! base64).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::core::types::{Dim, ElemType, Shape};
use crate::error::{Error, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum IntRepr<T> {
    Num(T),
    Str(String),
}

impl<T: FromStr> IntRepr<T>
where
    T::Err: Display,
{
    fn into_int<E: serde::de::Error>(self) -> std::result::Result<T, E> {
        match self {
            IntRepr::Num(v) => Ok(v),
            IntRepr::Str(s) => s.parse().map_err(E::custom),
        }
    }
}

fn de_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    IntRepr::<i64>::deserialize(d)?.into_int()
}

fn de_opt_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Option::<IntRepr<i64>>::deserialize(d)?.map(IntRepr::into_int).transpose()
}

fn de_vec_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<i64>, D::Error> {
    Vec::<IntRepr<i64>>::deserialize(d)?.into_iter().map(IntRepr::into_int).collect()
}

fn de_vec_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u64>, D::Error> {
    Vec::<IntRepr<u64>>::deserialize(d)?.into_iter().map(IntRepr::into_int).collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelDef {
    #[serde(deserialize_with = "de_i64")]
    pub ir_version: i64,
    pub opset_import: Vec<OpsetId>,
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    #[serde(deserialize_with = "de_i64")]
    pub model_version: i64,
    pub doc_string: String,
    pub metadata_props: Vec<StringEntry>,
    pub graph: GraphDef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpsetId {
    pub domain: String,
    #[serde(deserialize_with = "de_i64")]
    pub version: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StringEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphDef {
    #[serde(rename = "node")]
    pub nodes: Vec<NodeDef>,
    pub name: String,
    #[serde(rename = "initializer")]
    pub initializers: Vec<TensorDef>,
    pub doc_string: String,
    #[serde(rename = "input")]
    pub inputs: Vec<ValueInfo>,
    #[serde(rename = "output")]
    pub outputs: Vec<ValueInfo>,
    pub value_info: Vec<ValueInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeDef {
    #[serde(rename = "input")]
    pub inputs: Vec<String>,
    #[serde(rename = "output")]
    pub outputs: Vec<String>,
    pub name: String,
    pub op_type: String,
    /// Operator set the kind belongs to; empty or `ai.onnx` for the default set.
    pub domain: String,
    #[serde(rename = "attribute")]
    pub attributes: Vec<AttributeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttributeDef {
    pub name: String,
    pub f: Option<f32>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub i: Option<i64>,
    pub s: Option<String>,
    #[serde(deserialize_with = "de_vec_i64")]
    pub ints: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValueInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<TypeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeDef {
    pub tensor_type: Option<TensorTypeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TensorTypeDef {
    pub elem_type: ElemType,
    pub shape: Option<ShapeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShapeDef {
    pub dim: Vec<DimDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DimDef {
    #[serde(deserialize_with = "de_opt_i64")]
    pub dim_value: Option<i64>,
    pub dim_param: Option<String>,
}

/// Constant tensor bound to a graph input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TensorDef {
    pub name: String,
    #[serde(deserialize_with = "de_vec_i64")]
    pub dims: Vec<i64>,
    pub data_type: ElemType,
    pub float_data: Vec<f32>,
    pub double_data: Vec<f64>,
    pub int32_data: Vec<i32>,
    #[serde(deserialize_with = "de_vec_i64")]
    pub int64_data: Vec<i64>,
    #[serde(deserialize_with = "de_vec_u64")]
    pub uint64_data: Vec<u64>,
    /// Base64 of the little-endian packed values; takes precedence over the
    /// typed fields when present.
    pub raw_data: Option<String>,
}

/// Initializer values decoded from whichever field holds them.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int(Vec<i64>),
    UInt(Vec<u64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(v) => v.len(),
            TensorData::Double(v) => v.len(),
            TensorData::Int(v) => v.len(),
            TensorData::UInt(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_text(&self) -> Vec<String> {
        match self {
            TensorData::Float(v) => v.iter().map(f32::to_string).collect(),
            TensorData::Double(v) => v.iter().map(f64::to_string).collect(),
            TensorData::Int(v) => v.iter().map(i64::to_string).collect(),
            TensorData::UInt(v) => v.iter().map(u64::to_string).collect(),
        }
    }
}

impl ModelDef {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl GraphDef {
    pub fn initializer(&self, name: &str) -> Option<&TensorDef> {
        self.initializers.iter().find(|t| t.name == name)
    }

    /// Graph inputs that are not bound to an initializer; these become
    /// function parameters.
    pub fn inputs_without_initializers(&self) -> impl Iterator<Item = &ValueInfo> {
        self.inputs.iter().filter(|input| self.initializer(&input.name).is_none())
    }

    /// Type information for a tensor name, searched across declared inputs,
    /// intermediate values, outputs and finally initializer dims.
    pub fn tensor_info(&self, name: &str) -> Option<(ElemType, Shape)> {
        let declared = self.inputs.iter()
            .chain(&self.value_info)
            .chain(&self.outputs)
            .filter(|v| v.name == name)
            .find_map(|v| v.elem_type().zip(v.shape()));
        declared.or_else(|| self.initializer(name).map(|t| (t.data_type, t.shape())))
    }

    pub fn shape_of(&self, name: &str) -> Option<Shape> {
        self.tensor_info(name).map(|(_, shape)| shape)
    }
}

impl NodeDef {
    /// Whether the operator kind comes from the default operator set.
    pub fn in_default_domain(&self) -> bool {
        matches!(self.domain.as_str(), "" | "ai.onnx")
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(|a| a.i)
    }

    pub fn attr_float(&self, name: &str) -> Option<f32> {
        self.attribute(name).and_then(|a| a.f)
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        self.attribute(name).map(|a| a.ints.as_slice())
    }

    /// Input name at `position`, if present and not an omitted optional input.
    pub fn input(&self, position: usize) -> Option<&str> {
        self.inputs.get(position).map(String::as_str).filter(|name| !name.is_empty())
    }

    pub fn output(&self, position: usize) -> Option<&str> {
        self.outputs.get(position).map(String::as_str).filter(|name| !name.is_empty())
    }

    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(String::as_str).filter(|name| !name.is_empty())
    }

    pub fn present_outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str).filter(|name| !name.is_empty())
    }

    /// Node name, falling back to the first output for unnamed nodes.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            self.outputs.first().map(String::as_str).unwrap_or(&self.op_type)
        }
    }
}

impl ValueInfo {
    pub fn elem_type(&self) -> Option<ElemType> {
        self.ty.as_ref()?.tensor_type.as_ref().map(|t| t.elem_type)
    }

    pub fn shape(&self) -> Option<Shape> {
        let shape = self.ty.as_ref()?.tensor_type.as_ref()?.shape.as_ref()?;
        let dims = shape.dim.iter()
            .map(|d| match (d.dim_value, &d.dim_param) {
                (Some(v), _) if v >= 0 => Dim::Static(v as usize),
                (_, Some(p)) => Dim::Variable(p.clone()),
                _ => Dim::Unknown,
            })
            .collect();
        Some(Shape { dims })
    }
}

impl TensorDef {
    pub fn shape(&self) -> Shape {
        Shape { dims: self.dims.iter().map(|&d| Dim::Static(d.max(0) as usize)).collect() }
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Values in storage order, from `raw_data` when present.
    pub fn data(&self) -> Result<TensorData> {
        match self.raw_data.as_deref().filter(|raw| !raw.is_empty()) {
            Some(raw) => self.decode_raw(raw),
            None => self.typed_data(),
        }
    }

    pub fn values_as_text(&self) -> Result<Vec<String>> {
        Ok(self.data()?.to_text())
    }

    fn typed_data(&self) -> Result<TensorData> {
        let small_ints = || TensorData::Int(self.int32_data.iter().map(|&v| i64::from(v)).collect());
        Ok(match self.data_type {
            ElemType::Float => TensorData::Float(self.float_data.clone()),
            ElemType::Double => TensorData::Double(self.double_data.clone()),
            ElemType::Int64 => TensorData::Int(self.int64_data.clone()),
            ElemType::Uint32 | ElemType::Uint64 => TensorData::UInt(self.uint64_data.clone()),
            ElemType::Int8
            | ElemType::Uint8
            | ElemType::Int16
            | ElemType::Uint16
            | ElemType::Int32
            | ElemType::Bool => small_ints(),
            ElemType::Bfloat16 => {
                TensorData::Float(self.int32_data.iter().map(|&bits| bf16_to_f32(bits as u16)).collect())
            }
            ElemType::Undefined => {
                if !self.float_data.is_empty() {
                    TensorData::Float(self.float_data.clone())
                } else if !self.double_data.is_empty() {
                    TensorData::Double(self.double_data.clone())
                } else if !self.int32_data.is_empty() {
                    small_ints()
                } else if !self.uint64_data.is_empty() {
                    TensorData::UInt(self.uint64_data.clone())
                } else {
                    TensorData::Int(self.int64_data.clone())
                }
            }
            ElemType::Float16 | ElemType::String => return Err(self.unsupported_type()),
        })
    }

    fn decode_raw(&self, encoded: &str) -> Result<TensorData> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| self.invalid(format!("raw_data is not valid base64: {}", e)))?;
        let width = match self.data_type {
            ElemType::Int8 | ElemType::Uint8 | ElemType::Bool => 1,
            ElemType::Int16 | ElemType::Uint16 | ElemType::Bfloat16 => 2,
            ElemType::Float | ElemType::Int32 | ElemType::Uint32 => 4,
            ElemType::Double | ElemType::Int64 | ElemType::Uint64 => 8,
            _ => return Err(self.unsupported_type()),
        };
        if bytes.len() % width != 0 {
            return Err(self.invalid(format!("{} raw bytes do not split into {}-byte values", bytes.len(), width)));
        }

        let chunks = bytes.chunks_exact(width);
        Ok(match self.data_type {
            ElemType::Float => TensorData::Float(chunks.map(|c| f32::from_le_bytes(le(c))).collect()),
            ElemType::Double => TensorData::Double(chunks.map(|c| f64::from_le_bytes(le(c))).collect()),
            ElemType::Bfloat16 => TensorData::Float(chunks.map(|c| bf16_to_f32(u16::from_le_bytes(le(c)))).collect()),
            ElemType::Int8 => TensorData::Int(chunks.map(|c| i64::from(c[0] as i8)).collect()),
            ElemType::Uint8 | ElemType::Bool => TensorData::Int(chunks.map(|c| i64::from(c[0])).collect()),
            ElemType::Int16 => TensorData::Int(chunks.map(|c| i64::from(i16::from_le_bytes(le(c)))).collect()),
            ElemType::Uint16 => TensorData::Int(chunks.map(|c| i64::from(u16::from_le_bytes(le(c)))).collect()),
            ElemType::Int32 => TensorData::Int(chunks.map(|c| i64::from(i32::from_le_bytes(le(c)))).collect()),
            ElemType::Uint32 => TensorData::UInt(chunks.map(|c| u64::from(u32::from_le_bytes(le(c)))).collect()),
            ElemType::Int64 => TensorData::Int(chunks.map(|c| i64::from_le_bytes(le(c))).collect()),
            _ => TensorData::UInt(chunks.map(|c| u64::from_le_bytes(le(c))).collect()),
        })
    }

    fn unsupported_type(&self) -> Error {
        self.invalid(format!("{:?} initializers are not supported", self.data_type))
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidInitializer { name: self.name.clone(), reason: reason.into() }
    }
}

/// Copies a `chunks_exact` slice into a fixed-size array.
fn le<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(chunk);
    bytes
}

fn bf16_to_f32(bits: u16) -> f32 {
    f32::from_bits(u32::from(bits) << 16)
}
