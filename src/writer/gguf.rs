//! GGUF v3 file writer
//!
//! Tensor data is spooled to `<output>.partial` as it arrives so the header,
//! whose tensor table is only known at the end, can be written first on
//! `finalize`. An unfinalized writer removes its spool on drop and never
//! creates the output file.

use super::{state_error, value_type, MetadataValue, ModelWriter, WriterPhase};
use crate::error::{ConvertError, Result};
use crate::tensor::{TensorDtype, TensorRecord};
use aprender::error::AprenderError;
use aprender::format::gguf::{self as format, GgmlType, GgufHeader, GgufValue};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// "GGUF" in little-endian
pub const GGUF_MAGIC: u32 = format::GGUF_MAGIC;

/// Format version written
pub const GGUF_VERSION: u32 = format::GGUF_VERSION;

/// Data section and per-tensor alignment
pub const GGUF_ALIGNMENT: u64 = format::GGUF_DEFAULT_ALIGNMENT as u64;

const SPOOL_SUFFIX: &str = ".partial";

/// Entry of the tensor info table
#[derive(Debug)]
struct TensorEntry {
    name: String,
    shape: Vec<usize>,
    dtype: TensorDtype,
    /// Relative to the start of the data section
    offset: u64,
}

/// Streams a model into a GGUF file
pub struct GgufWriter {
    path: PathBuf,
    spool_path: PathBuf,
    spool: Option<BufWriter<File>>,
    spool_len: u64,
    metadata: Vec<(String, MetadataValue)>,
    keys: HashSet<String>,
    tensors: Vec<TensorEntry>,
    names: HashSet<String>,
    phase: WriterPhase,
}

impl GgufWriter {
    /// Start a GGUF file at `path`
    ///
    /// # Errors
    ///
    /// Returns an IO error when the spool file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let spool_path = spool_path_for(&path);
        let spool = BufWriter::new(File::create(&spool_path)?);
        Ok(Self {
            path,
            spool_path,
            spool: Some(spool),
            spool_len: 0,
            metadata: Vec::new(),
            keys: HashSet::new(),
            tensors: Vec::new(),
            names: HashSet::new(),
            phase: WriterPhase::default(),
        })
    }

    /// Output file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of tensors added so far
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    fn encode_header(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GgufHeader {
            version: GGUF_VERSION,
            tensor_count: self.tensors.len() as u64,
            metadata_kv_count: self.metadata.len() as u64,
        }
        .write_to(&mut out)
        .map_err(aprender_error)?;

        for (key, value) in &self.metadata {
            match to_gguf_value(value) {
                Some(value) => {
                    format::write_metadata_kv(&mut out, key, &value).map_err(aprender_error)?;
                }
                None => {
                    write_string(&mut out, key.as_bytes());
                    out.extend_from_slice(&value.type_code().to_le_bytes());
                    write_value(&mut out, value)?;
                }
            }
        }

        for tensor in &self.tensors {
            format::GgufTensorInfo {
                name: tensor.name.clone(),
                n_dims: tensor.shape.len() as u32,
                // innermost dimension first
                dims: tensor.shape.iter().rev().map(|&dim| dim as u64).collect(),
                dtype: ggml_type(tensor.dtype),
                offset: tensor.offset,
            }
            .write_to(&mut out)
            .map_err(aprender_error)?;
        }

        let padding = format::padding_for_alignment(out.len(), format::GGUF_DEFAULT_ALIGNMENT);
        out.resize(out.len() + padding, 0);
        Ok(out)
    }

    /// Header followed by the spooled data; returns the file size
    fn write_output(&mut self) -> Result<u64> {
        let header = self.encode_header()?;
        if let Some(mut spool) = self.spool.take() {
            spool.flush()?;
        }

        let mut out = BufWriter::new(File::create(&self.path)?);
        out.write_all(&header)?;
        let mut data = File::open(&self.spool_path)?;
        let copied = std::io::copy(&mut data, &mut out)?;
        out.flush()?;
        drop(data);
        std::fs::remove_file(&self.spool_path)?;
        Ok(header.len() as u64 + copied)
    }
}

impl ModelWriter for GgufWriter {
    fn add_metadata(&mut self, key: &str, value: MetadataValue) -> Result<()> {
        self.phase.check_metadata(key)?;
        if !self.keys.insert(key.to_string()) {
            return Err(state_error(format!("duplicate metadata key '{key}'")));
        }
        validate_value(&value)?;
        self.metadata.push((key.to_string(), value));
        Ok(())
    }

    fn add_tensor(&mut self, tensor: TensorRecord) -> Result<()> {
        self.phase.begin_tensor(&tensor.name)?;
        if self.names.contains(&tensor.name) {
            return Err(state_error(format!("duplicate tensor '{}'", tensor.name)));
        }
        let expected = tensor.element_count() * tensor.dtype.size();
        if tensor.data.len() != expected {
            return Err(state_error(format!(
                "tensor '{}' carries {} bytes, expected {expected}",
                tensor.name,
                tensor.data.len()
            )));
        }
        let Some(spool) = self.spool.as_mut() else {
            return Err(state_error("spool already closed".to_string()));
        };

        let padding =
            format::padding_for_alignment(self.spool_len as usize, format::GGUF_DEFAULT_ALIGNMENT);
        spool.write_all(&vec![0u8; padding])?;
        let offset = self.spool_len + padding as u64;
        spool.write_all(&tensor.data)?;
        self.spool_len = offset + tensor.data.len() as u64;

        tracing::debug!(
            name = %tensor.name,
            shape = ?tensor.shape,
            dtype = %tensor.dtype,
            offset,
            "spooled tensor"
        );
        self.names.insert(tensor.name.clone());
        self.tensors.push(TensorEntry {
            name: tensor.name,
            shape: tensor.shape,
            dtype: tensor.dtype,
            offset,
        });
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut phase = self.phase;
        phase.finish()?;
        let written = match self.write_output() {
            Ok(written) => written,
            Err(e) => {
                // leave no truncated output; the spool goes on drop
                if std::fs::remove_file(&self.path).is_ok() {
                    tracing::debug!(path = %self.path.display(), "removed incomplete output");
                }
                return Err(e);
            }
        };
        self.phase = phase;

        tracing::info!(
            path = %self.path.display(),
            tensors = self.tensors.len(),
            metadata = self.metadata.len(),
            bytes = written,
            "wrote GGUF file"
        );
        Ok(())
    }
}

impl Drop for GgufWriter {
    fn drop(&mut self) {
        if self.phase != WriterPhase::Finalized {
            self.spool = None;
            if std::fs::remove_file(&self.spool_path).is_ok() {
                tracing::debug!(spool = %self.spool_path.display(), "removed unfinished spool");
            }
        }
    }
}

fn spool_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(SPOOL_SUFFIX);
    PathBuf::from(name)
}

fn aprender_error(e: AprenderError) -> ConvertError {
    ConvertError::Io(std::io::Error::other(e.to_string()))
}

const fn ggml_type(dtype: TensorDtype) -> GgmlType {
    match dtype {
        TensorDtype::F32 => GgmlType::F32,
        TensorDtype::F16 => GgmlType::F16,
    }
}

/// The value as aprender's `GgufValue`, when that type can hold it
///
/// Non-UTF-8 token text, empty arrays and arrays of the narrower scalar
/// types have no `GgufValue` form and are encoded by [`write_value`].
fn to_gguf_value(value: &MetadataValue) -> Option<GgufValue> {
    Some(match value {
        MetadataValue::U8(v) => GgufValue::Uint8(*v),
        MetadataValue::I8(v) => GgufValue::Int8(*v),
        MetadataValue::U16(v) => GgufValue::Uint16(*v),
        MetadataValue::I16(v) => GgufValue::Int16(*v),
        MetadataValue::U32(v) => GgufValue::Uint32(*v),
        MetadataValue::I32(v) => GgufValue::Int32(*v),
        MetadataValue::U64(v) => GgufValue::Uint64(*v),
        MetadataValue::I64(v) => GgufValue::Int64(*v),
        MetadataValue::F32(v) => GgufValue::Float32(*v),
        MetadataValue::F64(v) => GgufValue::Float64(*v),
        MetadataValue::Bool(v) => GgufValue::Bool(*v),
        MetadataValue::String(s) => GgufValue::String(s.clone()),
        MetadataValue::Bytes(b) => GgufValue::String(String::from_utf8(b.clone()).ok()?),
        MetadataValue::Array(items) if items.is_empty() => return None,
        MetadataValue::Array(items) => match MetadataValue::array_element_type(items).ok()? {
            value_type::U32 => GgufValue::ArrayUint32(collect(items, |v| match *v {
                MetadataValue::U32(v) => Some(v),
                _ => None,
            })?),
            value_type::I32 => GgufValue::ArrayInt32(collect(items, |v| match *v {
                MetadataValue::I32(v) => Some(v),
                _ => None,
            })?),
            value_type::F32 => GgufValue::ArrayFloat32(collect(items, |v| match *v {
                MetadataValue::F32(v) => Some(v),
                _ => None,
            })?),
            value_type::STRING => {
                GgufValue::ArrayString(collect(items, |v| v.as_str().map(str::to_string))?)
            }
            _ => return None,
        },
    })
}

fn collect<T>(items: &[MetadataValue], pick: impl Fn(&MetadataValue) -> Option<T>) -> Option<Vec<T>> {
    items.iter().map(pick).collect()
}

fn validate_value(value: &MetadataValue) -> Result<()> {
    if let MetadataValue::Array(items) = value {
        MetadataValue::array_element_type(items)?;
        items.iter().try_for_each(validate_value)?;
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_value(out: &mut Vec<u8>, value: &MetadataValue) -> Result<()> {
    match value {
        MetadataValue::U8(v) => out.push(*v),
        MetadataValue::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Bool(v) => out.push(u8::from(*v)),
        MetadataValue::String(s) => write_string(out, s.as_bytes()),
        MetadataValue::Bytes(b) => write_string(out, b),
        MetadataValue::Array(items) => {
            let element_type = MetadataValue::array_element_type(items)?;
            out.extend_from_slice(&element_type.to_le_bytes());
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            // nested arrays carry their own element type header
            for item in items {
                write_value(out, item)?;
            }
        }
    }
    Ok(())
}
