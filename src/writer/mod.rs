//! Model-file writers
//!
//! [`ModelWriter`] is the sink the conversion pipeline drives. All metadata
//! must be added before the first tensor; `finalize` closes the file.
//!
//! - [`GgufWriter`]: GGUF v3 on disk
//! - [`MemoryWriter`]: ordered in-memory event log

mod gguf;
mod memory;
mod summary;


pub use gguf::{GgufWriter, GGUF_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
pub use memory::{MemoryWriter, WriterEvent};
pub use summary::{read_summary, read_summary_file, GgufSummary, GgufTensorInfo};

use crate::error::{ConvertError, Result};
use crate::tensor::TensorRecord;

/// `general.architecture`
pub const KEY_ARCHITECTURE: &str = "general.architecture";
/// `tokenizer.ggml.tokens`
pub const KEY_TOKENS: &str = "tokenizer.ggml.tokens";
/// `tokenizer.ggml.scores`
pub const KEY_SCORES: &str = "tokenizer.ggml.scores";
/// `tokenizer.ggml.token_type`
pub const KEY_TOKEN_TYPE: &str = "tokenizer.ggml.token_type";

/// GGUF metadata value type codes
pub(crate) mod value_type {
    pub const U8: u32 = 0;
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}

/// Typed metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    /// String value that is not necessarily UTF-8 (token text)
    Bytes(Vec<u8>),
    /// Homogeneous array
    Array(Vec<MetadataValue>),
}

impl MetadataValue {
    /// GGUF type code
    #[must_use]
    pub const fn type_code(&self) -> u32 {
        match self {
            Self::U8(_) => value_type::U8,
            Self::I8(_) => value_type::I8,
            Self::U16(_) => value_type::U16,
            Self::I16(_) => value_type::I16,
            Self::U32(_) => value_type::U32,
            Self::I32(_) => value_type::I32,
            Self::U64(_) => value_type::U64,
            Self::I64(_) => value_type::I64,
            Self::F32(_) => value_type::F32,
            Self::F64(_) => value_type::F64,
            Self::Bool(_) => value_type::BOOL,
            Self::String(_) | Self::Bytes(_) => value_type::STRING,
            Self::Array(_) => value_type::ARRAY,
        }
    }

    /// Array of UTF-8 strings
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Unsigned integer value of any width
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(u64::from(v)),
            Self::U16(v) => Some(u64::from(v)),
            Self::U32(v) => Some(u64::from(v)),
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[MetadataValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Element type of an array, checking that every element agrees
    ///
    /// Empty arrays are typed as `u8`.
    pub(crate) fn array_element_type(items: &[MetadataValue]) -> Result<u32> {
        let element_type = items.first().map_or(value_type::U8, Self::type_code);
        if let Some(odd) = items.iter().find(|item| item.type_code() != element_type) {
            return Err(ConvertError::WriterState {
                message: format!(
                    "array mixes element types {element_type} and {}",
                    odd.type_code()
                ),
            });
        }
        Ok(element_type)
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Self::Array(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

/// Sink for converted metadata and tensors
pub trait ModelWriter {
    /// Add one metadata key
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::WriterState`] after the first tensor, after
    /// finalize, or for a duplicate key.
    fn add_metadata(&mut self, key: &str, value: MetadataValue) -> Result<()>;

    /// Add one tensor
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::WriterState`] after finalize or for a
    /// duplicate name, or an IO error from the underlying sink.
    fn add_tensor(&mut self, tensor: TensorRecord) -> Result<()>;

    /// Complete the output
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::WriterState`] when called twice, or an IO
    /// error from the underlying sink.
    fn finalize(&mut self) -> Result<()>;

    /// Set `general.architecture`
    ///
    /// # Errors
    ///
    /// Same as [`ModelWriter::add_metadata`].
    fn set_architecture_name(&mut self, name: &str) -> Result<()> {
        self.add_metadata(KEY_ARCHITECTURE, MetadataValue::String(name.to_string()))
    }

    /// Set `tokenizer.ggml.tokens`
    ///
    /// # Errors
    ///
    /// Same as [`ModelWriter::add_metadata`].
    fn add_token_list(&mut self, tokens: Vec<Vec<u8>>) -> Result<()> {
        let items = tokens.into_iter().map(MetadataValue::Bytes).collect();
        self.add_metadata(KEY_TOKENS, MetadataValue::Array(items))
    }

    /// Set `tokenizer.ggml.scores`
    ///
    /// # Errors
    ///
    /// Same as [`ModelWriter::add_metadata`].
    fn add_token_scores(&mut self, scores: Vec<f32>) -> Result<()> {
        let items = scores.into_iter().map(MetadataValue::F32).collect();
        self.add_metadata(KEY_SCORES, MetadataValue::Array(items))
    }

    /// Set `tokenizer.ggml.token_type`
    ///
    /// # Errors
    ///
    /// Same as [`ModelWriter::add_metadata`].
    fn add_token_types(&mut self, types: Vec<i32>) -> Result<()> {
        let items = types.into_iter().map(MetadataValue::I32).collect();
        self.add_metadata(KEY_TOKEN_TYPE, MetadataValue::Array(items))
    }
}

/// Ordering rules shared by every writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WriterPhase {
    #[default]
    Metadata,
    Tensors,
    Finalized,
}

impl WriterPhase {
    pub(crate) fn check_metadata(self, key: &str) -> Result<()> {
        match self {
            Self::Metadata => Ok(()),
            Self::Tensors => Err(state_error(format!(
                "metadata '{key}' added after the first tensor"
            ))),
            Self::Finalized => Err(state_error(format!("metadata '{key}' added after finalize"))),
        }
    }

    pub(crate) fn begin_tensor(&mut self, name: &str) -> Result<()> {
        if *self == Self::Finalized {
            return Err(state_error(format!("tensor '{name}' added after finalize")));
        }
        *self = Self::Tensors;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        if *self == Self::Finalized {
            return Err(state_error("finalize called twice".to_string()));
        }
        *self = Self::Finalized;
        Ok(())
    }
}

pub(crate) fn state_error(message: String) -> ConvertError {
    ConvertError::WriterState { message }
}
