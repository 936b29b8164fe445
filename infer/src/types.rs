//! Tensor metadata: element types, shapes and I/O descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int64,
    Int32,
    Float,
    Bf16,
    Half,
    Bool,
    Uint8,
    Int8,
    Fp8,
    /// Sub-byte type. Buffers cannot be sized for it.
    Int4,
}

impl DataType {
    /// Returns the size of one element in bytes, or `None` for sub-byte types.
    pub fn element_size(self) -> Option<usize> {
        match self {
            DataType::Int64 => Some(8),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Bf16 | DataType::Half => Some(2),
            DataType::Bool | DataType::Uint8 | DataType::Int8 | DataType::Fp8 => Some(1),
            DataType::Int4 => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int64 => "int64",
            DataType::Int32 => "int32",
            DataType::Float => "float",
            DataType::Bf16 => "bf16",
            DataType::Half => "half",
            DataType::Bool => "bool",
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Fp8 => "fp8",
            DataType::Int4 => "int4",
        };
        f.write_str(s)
    }
}

/// Rust scalar types that can view a host buffer.
pub trait Element: Copy + 'static {
    const DATA_TYPE: DataType;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float;
}

impl Element for i32 {
    const DATA_TYPE: DataType = DataType::Int32;
}

impl Element for i64 {
    const DATA_TYPE: DataType = DataType::Int64;
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::Uint8;
}

impl Element for i8 {
    const DATA_TYPE: DataType = DataType::Int8;
}

/// Tensor extents. A negative extent marks a dynamic dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dims(pub Vec<i64>);

impl Dims {
    pub fn new(d: impl Into<Vec<i64>>) -> Self {
        Self(d.into())
    }

    /// Number of dimensions.
    pub fn nb_dims(&self) -> usize {
        self.0.len()
    }

    /// Product of all extents. A scalar (zero dimensions) has volume 1.
    pub fn volume(&self) -> i64 {
        self.0.iter().product()
    }

    /// Element count as `usize`, `None` on a negative extent or overflow.
    pub fn checked_volume(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    pub fn is_dynamic(&self) -> bool {
        self.0.iter().any(|&d| d < 0)
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        self.0.get(index).copied()
    }
}

impl From<Vec<i64>> for Dims {
    fn from(d: Vec<i64>) -> Self {
        Self(d)
    }
}

impl From<&[i64]> for Dims {
    fn from(d: &[i64]) -> Self {
        Self(d.to_vec())
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Integer division rounding up.
pub fn div_up(x: i64, n: i64) -> i64 {
    (x + n - 1) / n
}

/// Whether the engine reads or writes a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorIoMode {
    Input,
    Output,
}

/// Packed memory layout along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vectorization {
    /// Index of the packed dimension.
    pub dim: usize,
    /// Scalars stored per vector along that dimension.
    pub components: usize,
}

/// Engine-declared metadata for one I/O tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Dims,
    pub data_type: DataType,
    pub io_mode: TensorIoMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectorization: Option<Vectorization>,
}

impl TensorDesc {
    pub fn new(
        name: impl Into<String>,
        shape: impl Into<Dims>,
        data_type: DataType,
        io_mode: TensorIoMode,
    ) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            data_type,
            io_mode,
            vectorization: None,
        }
    }

    pub fn with_vectorization(mut self, dim: usize, components: usize) -> Self {
        self.vectorization = Some(Vectorization { dim, components });
        self
    }

    pub fn is_input(&self) -> bool {
        self.io_mode == TensorIoMode::Input
    }
}
