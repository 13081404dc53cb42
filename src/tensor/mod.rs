//! Tensor records and the per-tensor transforms
//!
//! A [`RawTensor`] comes out of a checkpoint shard with its source key and
//! dtype. [`TensorNameMapper`] gives it a canonical name and
//! [`LayoutTransformer`] turns it into the [`TensorRecord`] handed to the
//! writer.

mod layout;
mod names;

#[cfg(test)]
mod tests;

pub use layout::{apply_head_permute, reverse_head_permute, target_dtype, LayoutTransformer};
pub use names::{MappedName, TensorNameMapper};

/// Canonical name of the learned position table (kept wide in every precision)
pub const POSITION_EMBD_WEIGHT: &str = "position_embd.weight";

/// Dtype of an emitted tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorDtype {
    F32,
    F16,
}

impl TensorDtype {
    /// GGML type code
    #[must_use]
    pub const fn ggml_type(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
        }
    }

    /// Inverse of [`TensorDtype::ggml_type`]
    #[must_use]
    pub const fn from_ggml_type(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            _ => None,
        }
    }

    /// Bytes per element
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
        }
    }
}

impl std::fmt::Display for TensorDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dtype of a tensor as stored in the checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDtype {
    F32,
    F16,
    BF16,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    /// Anything without a lossless float coercion (e.g. FP8)
    Other(String),
}

impl SourceDtype {
    /// Bytes per element, `None` for [`SourceDtype::Other`]
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Bool => Some(1),
            Self::F16 | Self::BF16 | Self::I16 | Self::U16 => Some(2),
            Self::F32 | Self::I32 | Self::U32 => Some(4),
            Self::F64 | Self::I64 | Self::U64 => Some(8),
            Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn from_safetensors(dtype: safetensors::Dtype) -> Self {
        use safetensors::Dtype;
        match dtype {
            Dtype::F32 => Self::F32,
            Dtype::F16 => Self::F16,
            Dtype::BF16 => Self::BF16,
            Dtype::F64 => Self::F64,
            Dtype::I8 => Self::I8,
            Dtype::I16 => Self::I16,
            Dtype::I32 => Self::I32,
            Dtype::I64 => Self::I64,
            Dtype::U8 => Self::U8,
            Dtype::U16 => Self::U16,
            Dtype::U32 => Self::U32,
            Dtype::U64 => Self::U64,
            Dtype::BOOL => Self::Bool,
            other => Self::Other(format!("{other:?}")),
        }
    }
}

impl std::fmt::Display for SourceDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(name) => f.write_str(name),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Tensor as read from a checkpoint shard
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    /// Source key
    pub name: String,
    pub dtype: SourceDtype,
    /// Outermost dimension first
    pub shape: Vec<usize>,
    /// Little-endian element bytes
    pub data: Vec<u8>,
}

/// Canonically named tensor ready for the writer
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord {
    pub name: String,
    /// Outermost dimension first
    pub shape: Vec<usize>,
    pub dtype: TensorDtype,
    /// Little-endian element bytes
    pub data: Vec<u8>,
}

impl TensorRecord {
    /// Number of elements
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Requested output precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPrecision {
    /// Everything f32
    #[default]
    Wide,
    /// 2-D weights f16, vectors f32
    Narrow,
}

impl OutputPrecision {
    /// `general.file_type` value
    #[must_use]
    pub const fn file_type(self) -> u32 {
        match self {
            Self::Wide => 0,
            Self::Narrow => 1,
        }
    }

    /// Dtype name used in default output file names
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wide => "f32",
            Self::Narrow => "f16",
        }
    }
}
