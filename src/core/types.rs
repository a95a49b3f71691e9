use serde::{Deserialize, Deserializer};

/// Tensor element type, accepted either as the enum name (`"FLOAT"`) or as
/// its numeric code (`1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElemType {
    #[default]
    Undefined,
    Float,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    String,
    Bool,
    Float16,
    Double,
    Uint32,
    Uint64,
    Bfloat16,
}

impl ElemType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ElemType::Float,
            2 => ElemType::Uint8,
            3 => ElemType::Int8,
            4 => ElemType::Uint16,
            5 => ElemType::Int16,
            6 => ElemType::Int32,
            7 => ElemType::Int64,
            8 => ElemType::String,
            9 => ElemType::Bool,
            10 => ElemType::Float16,
            11 => ElemType::Double,
            12 => ElemType::Uint32,
            13 => ElemType::Uint64,
            16 => ElemType::Bfloat16,
            _ => ElemType::Undefined,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "FLOAT" => ElemType::Float,
            "UINT8" => ElemType::Uint8,
            "INT8" => ElemType::Int8,
            "UINT16" => ElemType::Uint16,
            "INT16" => ElemType::Int16,
            "INT32" => ElemType::Int32,
            "INT64" => ElemType::Int64,
            "STRING" => ElemType::String,
            "BOOL" => ElemType::Bool,
            "FLOAT16" => ElemType::Float16,
            "DOUBLE" => ElemType::Double,
            "UINT32" => ElemType::Uint32,
            "UINT64" => ElemType::Uint64,
            "BFLOAT16" => ElemType::Bfloat16,
            _ => ElemType::Undefined,
        }
    }

    /// Value type used for a rank-0 tensor of this element type.
    pub fn to_dml_scalar(&self) -> &'static str {
        match self {
            ElemType::Bool => "boolean",
            ElemType::String => "string",
            ElemType::Uint8
            | ElemType::Int8
            | ElemType::Uint16
            | ElemType::Int16
            | ElemType::Int32
            | ElemType::Int64
            | ElemType::Uint32
            | ElemType::Uint64 => "integer",
            _ => "double",
        }
    }
}

impl<'de> Deserialize<'de> for ElemType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i64),
            Name(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Code(code) => ElemType::from_code(code),
            Repr::Name(name) => ElemType::from_name(&name),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(usize),
    Variable(String),
    Unknown,
}

impl Dim {
    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dim::Static(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub dims: Vec<Dim>,
}

impl Shape {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn static_dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).and_then(Dim::as_static)
    }
}

/// Declared type of a function parameter or return value.
pub fn dml_value_type(elem: ElemType, shape: Option<&Shape>) -> String {
    match shape {
        Some(shape) if shape.rank() == 0 => elem.to_dml_scalar().to_string(),
        _ => "matrix[double]".to_string(),
    }
}

/// Turns a tensor name into a valid identifier.
pub fn dml_identifier(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    match sanitized.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => sanitized,
        _ => format!("v{}", sanitized),
    }
}

/// `gen_` followed by the lower-cased graph name, with `-`, `|` and spaces
/// mapped to `_` and anything outside `[0-9a-z_]` dropped.
pub fn dml_function_name(graph_name: &str) -> String {
    let body: String = graph_name
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '|' | ' ') { '_' } else { c })
        .filter(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || *c == '_')
        .collect();
    format!("gen_{}", body)
}
