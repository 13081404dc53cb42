//! GGUF header reader
//!
//! Parses the header, metadata and tensor info table of a GGUF v3 file
//! without touching tensor data.

use super::{value_type, MetadataValue, GGUF_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
use crate::error::{ConvertError, Result};
use crate::tensor::TensorDtype;
use std::io::{BufReader, Read};
use std::path::Path;

/// Longest string accepted (keys, token text, tensor names)
const MAX_STRING_LEN: u64 = 1 << 24;
/// Largest array accepted
const MAX_ARRAY_LEN: u64 = 1 << 26;
const MAX_DIMS: u32 = 8;

/// Parsed GGUF header
#[derive(Debug, Clone)]
pub struct GgufSummary {
    pub version: u32,
    /// Key/value pairs in file order
    pub metadata: Vec<(String, MetadataValue)>,
    pub tensors: Vec<GgufTensorInfo>,
    /// Absolute offset of the data section
    pub data_offset: u64,
}

/// One entry of the tensor info table
#[derive(Debug, Clone, PartialEq)]
pub struct GgufTensorInfo {
    pub name: String,
    /// Innermost dimension first, as stored
    pub dims: Vec<u64>,
    /// GGML type id
    pub ggml_type: u32,
    /// Relative to the data section
    pub offset: u64,
}

impl GgufTensorInfo {
    /// Outermost dimension first
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().rev().map(|&d| d as usize).collect()
    }

    #[must_use]
    pub fn dtype(&self) -> Option<TensorDtype> {
        TensorDtype::from_ggml_type(self.ggml_type)
    }

    /// Number of elements, `None` if it overflows `u64`
    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims.iter().try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
    }

    /// Payload size in bytes, when the type is one this crate writes
    #[must_use]
    pub fn byte_len(&self) -> Option<u64> {
        let size = self.dtype()?.size() as u64;
        self.element_count()?.checked_mul(size)
    }
}

impl GgufSummary {
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata
            .iter()
            .find_map(|(k, value)| (k == key).then_some(value))
    }

    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.tensors.iter().find(|info| info.name == name)
    }

    /// Payload bytes of `name` inside the complete file contents
    #[must_use]
    pub fn tensor_data<'a>(&self, file: &'a [u8], name: &str) -> Option<&'a [u8]> {
        let info = self.tensor(name)?;
        let start = usize::try_from(self.data_offset.checked_add(info.offset)?).ok()?;
        let len = usize::try_from(info.byte_len()?).ok()?;
        file.get(start..start.checked_add(len)?)
    }
}

/// Read the header of the GGUF file at `path`
///
/// Also checks that every tensor payload lies inside the file.
///
/// # Errors
///
/// Returns [`ConvertError::GgufParse`] for a malformed or truncated file.
pub fn read_summary_file(path: &Path) -> Result<GgufSummary> {
    let file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    let summary = read_summary(BufReader::new(file))?;

    for info in summary.tensors.iter().filter(|info| info.dtype().is_some()) {
        let end = info.byte_len().and_then(|len| {
            summary
                .data_offset
                .checked_add(info.offset)?
                .checked_add(len)
        });
        match end {
            Some(end) if end <= file_size => {}
            Some(end) => {
                return Err(parse_error(format!(
                    "tensor '{}' ends at byte {end}, past the end of the {file_size}-byte file",
                    info.name
                )))
            }
            None => {
                return Err(parse_error(format!(
                    "tensor '{}' has a size that overflows u64",
                    info.name
                )))
            }
        }
    }
    Ok(summary)
}

/// Read a GGUF header from `reader`
///
/// # Errors
///
/// Returns [`ConvertError::GgufParse`] for a bad magic, an unsupported
/// version, an unknown value type or truncated input.
pub fn read_summary<R: Read>(reader: R) -> Result<GgufSummary> {
    let mut cursor = Cursor { reader, pos: 0 };

    let magic = cursor.u32()?;
    if magic != GGUF_MAGIC {
        return Err(parse_error(format!(
            "Invalid GGUF magic: expected 'GGUF', got '{}'",
            String::from_utf8_lossy(&magic.to_le_bytes())
        )));
    }
    let version = cursor.u32()?;
    if version != GGUF_VERSION {
        return Err(parse_error(format!(
            "Unsupported GGUF version: {version} (expected {GGUF_VERSION})"
        )));
    }
    let tensor_count = cursor.u64()?;
    let metadata_count = cursor.u64()?;

    let mut metadata = Vec::new();
    for _ in 0..metadata_count {
        let key = cursor.string()?;
        let kind = cursor.u32()?;
        let value = cursor.value(kind)?;
        metadata.push((key, value));
    }

    let mut tensors = Vec::new();
    for _ in 0..tensor_count {
        tensors.push(cursor.tensor_info()?);
    }

    let alignment = metadata
        .iter()
        .find(|(key, _)| key == "general.alignment")
        .and_then(|(_, value)| value.as_u64())
        .filter(|&a| a > 0)
        .unwrap_or(GGUF_ALIGNMENT);
    let data_offset = cursor.pos + padding_for_alignment(cursor.pos, alignment);

    Ok(GgufSummary {
        version,
        metadata,
        tensors,
        data_offset,
    })
}

fn parse_error(message: String) -> ConvertError {
    ConvertError::GgufParse { message }
}

/// Sequential little-endian reader tracking its position
struct Cursor<R> {
    reader: R,
    pos: u64,
}

impl<R: Read> Cursor<R> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                parse_error(format!("GGUF file truncated at byte {}", self.pos))
            } else {
                ConvertError::Io(e)
            }
        })?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn raw_string(&mut self) -> Result<Vec<u8>> {
        let len = self.u64()?;
        if len > MAX_STRING_LEN {
            return Err(parse_error(format!(
                "string of {len} bytes at byte {}",
                self.pos
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn string(&mut self) -> Result<String> {
        let at = self.pos;
        String::from_utf8(self.raw_string()?)
            .map_err(|_| parse_error(format!("string at byte {at} is not UTF-8")))
    }

    fn value(&mut self, kind: u32) -> Result<MetadataValue> {
        Ok(match kind {
            value_type::U8 => MetadataValue::U8(u8::from_le_bytes(self.bytes()?)),
            value_type::I8 => MetadataValue::I8(i8::from_le_bytes(self.bytes()?)),
            value_type::U16 => MetadataValue::U16(u16::from_le_bytes(self.bytes()?)),
            value_type::I16 => MetadataValue::I16(i16::from_le_bytes(self.bytes()?)),
            value_type::U32 => MetadataValue::U32(self.u32()?),
            value_type::I32 => MetadataValue::I32(i32::from_le_bytes(self.bytes()?)),
            value_type::F32 => MetadataValue::F32(f32::from_le_bytes(self.bytes()?)),
            value_type::BOOL => MetadataValue::Bool(self.bytes::<1>()?[0] != 0),
            value_type::STRING => {
                let raw = self.raw_string()?;
                match String::from_utf8(raw) {
                    Ok(s) => MetadataValue::String(s),
                    Err(e) => MetadataValue::Bytes(e.into_bytes()),
                }
            }
            value_type::ARRAY => {
                let element_type = self.u32()?;
                let len = self.u64()?;
                if len > MAX_ARRAY_LEN {
                    return Err(parse_error(format!(
                        "array of {len} elements at byte {}",
                        self.pos
                    )));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.value(element_type)?);
                }
                MetadataValue::Array(items)
            }
            value_type::U64 => MetadataValue::U64(self.u64()?),
            value_type::I64 => MetadataValue::I64(i64::from_le_bytes(self.bytes()?)),
            value_type::F64 => MetadataValue::F64(f64::from_le_bytes(self.bytes()?)),
            other => {
                return Err(parse_error(format!(
                    "unknown value type {other} at byte {}",
                    self.pos
                )))
            }
        })
    }

    fn tensor_info(&mut self) -> Result<GgufTensorInfo> {
        let name = self.string()?;
        let n_dims = self.u32()?;
        if n_dims > MAX_DIMS {
            return Err(parse_error(format!("tensor '{name}' has {n_dims} dimensions")));
        }
        let dims = (0..n_dims).map(|_| self.u64()).collect::<Result<Vec<_>>>()?;
        let ggml_type = self.u32()?;
        let offset = self.u64()?;
        Ok(GgufTensorInfo {
            name,
            dims,
            ggml_type,
            offset,
        })
    }
}

/// Bytes needed to round `offset` up to `alignment`
#[must_use]
pub(crate) const fn padding_for_alignment(offset: u64, alignment: u64) -> u64 {
    (alignment - offset % alignment) % alignment
}
