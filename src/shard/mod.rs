//! Checkpoint shard discovery and lazy tensor iteration
//!
//! A checkpoint is either a single `model.safetensors` or a complete run of
//! numbered shards `model-00001-of-0000N.safetensors`. PyTorch pickle
//! checkpoints (`pytorch_model.bin`, `pytorch_model-00001-of-0000N.bin`) are
//! refused unless the caller opts in with `allow_pickle`: loading them can
//! execute arbitrary code. SafeTensors always wins when both are present.

#[cfg(test)]
mod tests;

use crate::error::{ConvertError, Result};
use crate::tensor::{RawTensor, SourceDtype};
use candle_core::pickle::PthTensors;
use candle_core::{DType, Tensor};
use safetensors::SafeTensors;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Single-file checkpoint name
pub const SINGLE_FILE: &str = "model.safetensors";

const SHARD_PREFIX: &str = "model-";
const SHARD_SUFFIX: &str = ".safetensors";
/// Single-file pickle checkpoint name
pub const PICKLE_SINGLE_FILE: &str = "pytorch_model.bin";

const PICKLE_SHARD_PREFIX: &str = "pytorch_model-";
const PICKLE_SUFFIX: &str = ".bin";

/// On-disk checkpoint container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    SafeTensors,
    /// PyTorch zip archive holding a pickled state dict
    Pickle,
}

impl CheckpointFormat {
    /// Format implied by a file name
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") => Self::Pickle,
            _ => Self::SafeTensors,
        }
    }

    #[must_use]
    pub const fn is_safe(self) -> bool {
        matches!(self, Self::SafeTensors)
    }
}

/// Parse `<prefix>00001-of-00003<suffix>` into `(1, 3)`
fn parse_numbered(file_name: &str, prefix: &str, suffix: &str) -> Option<(usize, usize)> {
    let body = file_name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    let (index, total) = body.split_once("-of-")?;
    let index: usize = index.parse().ok()?;
    let total: usize = total.parse().ok()?;
    (index >= 1 && index <= total).then_some((index, total))
}

/// Parse `model-00001-of-00003.safetensors` into `(1, 3)`
fn parse_shard_name(file_name: &str) -> Option<(usize, usize)> {
    parse_numbered(file_name, SHARD_PREFIX, SHARD_SUFFIX)
}

/// Parse `pytorch_model-00001-of-00003.bin` into `(1, 3)`
fn parse_pickle_shard_name(file_name: &str) -> Option<(usize, usize)> {
    parse_numbered(file_name, PICKLE_SHARD_PREFIX, PICKLE_SUFFIX)
}

/// Order a numbered run, failing on the first gap
fn complete_run(numbered: &[(usize, usize, PathBuf)]) -> Result<Option<Vec<PathBuf>>> {
    let Some(&(_, total, _)) = numbered.iter().max_by_key(|(_, total, _)| *total) else {
        return Ok(None);
    };
    let mut shards = Vec::with_capacity(total);
    for expected in 1..=total {
        match numbered
            .iter()
            .find(|(index, of, _)| *index == expected && *of == total)
        {
            Some((_, _, path)) => shards.push(path.clone()),
            None => {
                return Err(ConvertError::MissingShard {
                    index: expected,
                    total,
                })
            }
        }
    }
    Ok(Some(shards))
}

/// Locate the SafeTensors checkpoint files of `model_dir`, in shard order
///
/// # Errors
///
/// Returns [`ConvertError::MissingShard`] for an incomplete shard run,
/// [`ConvertError::PickleCheckpoint`] when only pickle files exist, or
/// [`ConvertError::NoCheckpoint`] when there is nothing to read.
pub fn discover(model_dir: &Path) -> Result<Vec<PathBuf>> {
    discover_with(model_dir, false)
}

/// Locate the checkpoint files of `model_dir`, accepting pickle files when
/// `allow_pickle` is set
///
/// # Errors
///
/// As [`discover`]; with `allow_pickle` an incomplete pickle shard run is
/// [`ConvertError::MissingShard`] instead of a refusal.
pub fn discover_with(model_dir: &Path, allow_pickle: bool) -> Result<Vec<PathBuf>> {
    let single = model_dir.join(SINGLE_FILE);
    if single.is_file() {
        return Ok(vec![single]);
    }

    let mut numbered: Vec<(usize, usize, PathBuf)> = Vec::new();
    let mut pickle_numbered: Vec<(usize, usize, PathBuf)> = Vec::new();
    let mut pickle_single: Option<PathBuf> = None;
    for entry in std::fs::read_dir(model_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((index, total)) = parse_shard_name(name) {
            numbered.push((index, total, path));
        } else if let Some((index, total)) = parse_pickle_shard_name(name) {
            pickle_numbered.push((index, total, path));
        } else if name == PICKLE_SINGLE_FILE {
            pickle_single = Some(path);
        }
    }

    if let Some(shards) = complete_run(&numbered)? {
        return Ok(shards);
    }

    let first_pickle = pickle_single
        .clone()
        .or_else(|| pickle_numbered.iter().map(|(_, _, path)| path.clone()).min());
    let Some(file) = first_pickle else {
        return Err(ConvertError::NoCheckpoint {
            dir: model_dir.to_path_buf(),
        });
    };
    if !allow_pickle {
        return Err(ConvertError::PickleCheckpoint { file });
    }

    tracing::warn!(file = %file.display(), "reading PyTorch pickle checkpoint");
    if let Some(single) = pickle_single {
        return Ok(vec![single]);
    }
    Ok(complete_run(&pickle_numbered)?.unwrap_or_default())
}

/// Location of one tensor inside a shard buffer
#[derive(Debug)]
struct TensorSlot {
    name: String,
    dtype: SourceDtype,
    shape: Vec<usize>,
    range: Range<usize>,
}

/// One SafeTensors shard held in memory with its tensors in file-offset order
struct LoadedShard {
    buffer: Vec<u8>,
    slots: std::vec::IntoIter<TensorSlot>,
}

impl LoadedShard {
    fn open(path: &Path) -> Result<Self> {
        let buffer = std::fs::read(path)?;
        let parse_error = |e: safetensors::SafeTensorError| ConvertError::SafeTensorsParse {
            file: path.to_path_buf(),
            message: e.to_string(),
        };

        // validates header and data bounds
        SafeTensors::deserialize(&buffer).map_err(parse_error)?;
        let (header_len, metadata) = SafeTensors::read_metadata(&buffer).map_err(parse_error)?;
        let data_start = 8 + header_len;

        let mut slots: Vec<TensorSlot> = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| {
                let (begin, end) = info.data_offsets;
                TensorSlot {
                    name,
                    dtype: SourceDtype::from_safetensors(info.dtype),
                    shape: info.shape.clone(),
                    range: data_start + begin..data_start + end,
                }
            })
            .collect();
        slots.sort_by_key(|slot| slot.range.start);

        if let Some(slot) = slots.iter().find(|slot| slot.range.end > buffer.len()) {
            return Err(ConvertError::SafeTensorsParse {
                file: path.to_path_buf(),
                message: format!("tensor '{}' extends past the end of the file", slot.name),
            });
        }

        Ok(Self {
            buffer,
            slots: slots.into_iter(),
        })
    }

    fn next_tensor(&mut self) -> Option<RawTensor> {
        let slot = self.slots.next()?;
        let data = self.buffer[slot.range].to_vec();
        Some(RawTensor {
            name: slot.name,
            dtype: slot.dtype,
            shape: slot.shape,
            data,
        })
    }
}

/// One pickle shard; tensors are read from the archive one at a time, by name
struct PickleShard {
    path: PathBuf,
    tensors: PthTensors,
    names: std::vec::IntoIter<String>,
}

impl PickleShard {
    fn open(path: &Path) -> Result<Self> {
        let tensors = PthTensors::new(path, None).map_err(|e| pickle_error(path, &e))?;
        let mut names: Vec<String> = tensors.tensor_infos().keys().cloned().collect();
        names.sort();
        Ok(Self {
            path: path.to_path_buf(),
            tensors,
            names: names.into_iter(),
        })
    }

    fn next_tensor(&mut self) -> Option<Result<RawTensor>> {
        let name = self.names.next()?;
        let tensor = match self.tensors.get(&name) {
            Ok(Some(tensor)) => tensor,
            Ok(None) => {
                return Some(Err(ConvertError::PickleParse {
                    file: self.path.clone(),
                    message: format!("tensor '{name}' vanished from the archive"),
                }))
            }
            Err(e) => return Some(Err(pickle_error(&self.path, &e))),
        };
        Some(raw_from_candle(name, &tensor).map_err(|e| pickle_error(&self.path, &e)))
    }
}

fn pickle_error(path: &Path, e: &candle_core::Error) -> ConvertError {
    ConvertError::PickleParse {
        file: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Flatten a candle tensor into little-endian element bytes
fn raw_from_candle(name: String, tensor: &Tensor) -> candle_core::Result<RawTensor> {
    let shape = tensor.dims().to_vec();
    let flat = tensor.flatten_all()?;
    let (dtype, data) = match tensor.dtype() {
        DType::F32 => (SourceDtype::F32, le_bytes(&flat.to_vec1::<f32>()?)),
        DType::F16 => (SourceDtype::F16, le_bytes(&flat.to_vec1::<half::f16>()?)),
        DType::BF16 => (SourceDtype::BF16, le_bytes(&flat.to_vec1::<half::bf16>()?)),
        DType::F64 => (SourceDtype::F64, le_bytes(&flat.to_vec1::<f64>()?)),
        DType::I64 => (SourceDtype::I64, le_bytes(&flat.to_vec1::<i64>()?)),
        DType::U32 => (SourceDtype::U32, le_bytes(&flat.to_vec1::<u32>()?)),
        DType::U8 => (SourceDtype::U8, flat.to_vec1::<u8>()?),
        other => (SourceDtype::Other(format!("{other:?}")), Vec::new()),
    };
    Ok(RawTensor {
        name,
        dtype,
        shape,
        data,
    })
}

fn le_bytes<T: bytemuck::Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// A shard of either format
enum OpenShard {
    SafeTensors(LoadedShard),
    Pickle(PickleShard),
}

impl OpenShard {
    fn open(path: &Path) -> Result<Self> {
        match CheckpointFormat::from_path(path) {
            CheckpointFormat::SafeTensors => LoadedShard::open(path).map(Self::SafeTensors),
            CheckpointFormat::Pickle => PickleShard::open(path).map(Self::Pickle),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::SafeTensors(shard) => shard.slots.len(),
            Self::Pickle(shard) => shard.names.len(),
        }
    }

    fn next_tensor(&mut self) -> Option<Result<RawTensor>> {
        match self {
            Self::SafeTensors(shard) => shard.next_tensor().map(Ok),
            Self::Pickle(shard) => shard.next_tensor(),
        }
    }
}

/// Lazy single-pass iterator over every tensor of a checkpoint
///
/// Shards are read in index order; only the current shard is resident.
/// After an error the iterator is exhausted.
pub struct ShardIterator {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<OpenShard>,
    total: usize,
    opened: usize,
}

impl ShardIterator {
    /// Iterate the checkpoint found in `model_dir`
    ///
    /// # Errors
    ///
    /// Propagates [`discover`] errors.
    pub fn open(model_dir: &Path) -> Result<Self> {
        Self::open_with(model_dir, false)
    }

    /// Iterate the checkpoint found in `model_dir`, reading pickle files
    /// when `allow_pickle` is set
    ///
    /// # Errors
    ///
    /// Propagates [`discover_with`] errors.
    pub fn open_with(model_dir: &Path, allow_pickle: bool) -> Result<Self> {
        Ok(Self::from_paths(discover_with(model_dir, allow_pickle)?))
    }

    /// Iterate explicit shard paths in the given order
    #[must_use]
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            total: paths.len(),
            pending: paths.into_iter(),
            current: None,
            opened: 0,
        }
    }

    /// Number of shard files
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.total
    }
}

impl Iterator for ShardIterator {
    type Item = Result<RawTensor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(shard) = &mut self.current {
                match shard.next_tensor() {
                    Some(Ok(tensor)) => return Some(Ok(tensor)),
                    Some(Err(e)) => {
                        self.current = None;
                        self.pending = Vec::new().into_iter();
                        return Some(Err(e));
                    }
                    // release the buffer before the next shard is read
                    None => self.current = None,
                }
            }

            let path = self.pending.next()?;
            self.opened += 1;
            match OpenShard::open(&path) {
                Ok(shard) => {
                    tracing::info!(
                        shard = %path.display(),
                        index = self.opened,
                        total = self.total,
                        tensors = shard.len(),
                        "reading checkpoint shard"
                    );
                    self.current = Some(shard);
                }
                Err(e) => {
                    self.pending = Vec::new().into_iter();
                    return Some(Err(e));
                }
            }
        }
    }
}
