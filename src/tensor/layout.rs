//! Numeric layout and dtype policy
//!
//! Applied to every tensor in a fixed order:
//!
//! 1. coerce the source dtype to f32/f16 and squeeze unit dimensions
//! 2. undo the HuggingFace q/k head interleave (architecture hook)
//! 3. cast to the target dtype for the requested precision
//! 4. transpose input-major projection weights (architecture hook)

use super::{OutputPrecision, RawTensor, SourceDtype, TensorDtype, TensorRecord, POSITION_EMBD_WEIGHT};
use crate::arch::ArchitectureDescriptor;
use crate::error::{ConvertError, Result};
use crate::hparams::HyperParams;
use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};

/// Canonical weights stored `[in, out]` by Conv1D-style checkpoints
const TRANSPOSED_SUFFIXES: [&str; 4] = [
    ".attn_qkv.weight",
    ".attn_output.weight",
    ".ffn_up.weight",
    ".ffn_down.weight",
];

const ATTN_Q_WEIGHT: &str = ".attn_q.weight";
const ATTN_K_WEIGHT: &str = ".attn_k.weight";

/// Decoded element buffer
#[derive(Debug, Clone, PartialEq)]
enum Values {
    F32(Vec<f32>),
    F16(Vec<f16>),
}

impl Values {
    fn dtype(&self) -> TensorDtype {
        match self {
            Self::F32(_) => TensorDtype::F32,
            Self::F16(_) => TensorDtype::F16,
        }
    }

    fn cast(self, dtype: TensorDtype) -> Self {
        match (self, dtype) {
            (Self::F32(v), TensorDtype::F16) => Self::F16(v.into_iter().map(f16::from_f32).collect()),
            (Self::F16(v), TensorDtype::F32) => Self::F32(v.into_iter().map(f16::to_f32).collect()),
            (same, _) => same,
        }
    }

    fn head_permute(self, shape: &[usize], n_head: usize, inverse: bool) -> std::result::Result<Self, String> {
        Ok(match self {
            Self::F32(v) => Self::F32(head_permute(v, shape, n_head, inverse)?),
            Self::F16(v) => Self::F16(head_permute(v, shape, n_head, inverse)?),
        })
    }

    fn transpose_last(self, shape: &[usize]) -> std::result::Result<(Self, Vec<usize>), String> {
        Ok(match self {
            Self::F32(v) => {
                let (v, shape) = transpose_last(v, shape)?;
                (Self::F32(v), shape)
            }
            Self::F16(v) => {
                let (v, shape) = transpose_last(v, shape)?;
                (Self::F16(v), shape)
            }
        })
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::F32(v) => bytemuck::cast_slice::<f32, u8>(&v).to_vec(),
            Self::F16(v) => bytemuck::cast_slice::<f16, u8>(&v).to_vec(),
        }
    }
}

/// Per-run transform state derived from the architecture and hyperparameters
#[derive(Debug, Clone)]
pub struct LayoutTransformer {
    reverse_qk_permute: bool,
    transpose_projections: bool,
    head_count: usize,
    /// Head count that undoes the key interleave
    key_head_split: usize,
    precision: OutputPrecision,
}

impl LayoutTransformer {
    #[must_use]
    pub fn new(desc: &ArchitectureDescriptor, hparams: &HyperParams, precision: OutputPrecision) -> Self {
        let head_count = hparams.head_count as usize;
        let key_head_split = if hparams.is_grouped_query() && hparams.head_count_kv > 0 {
            head_count / hparams.head_count_kv as usize
        } else {
            head_count
        };
        Self {
            reverse_qk_permute: desc.reverse_qk_permute,
            transpose_projections: desc.transpose_projections,
            head_count,
            key_head_split,
            precision,
        }
    }

    /// Transform `raw` into the record emitted as `canonical`
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::UnsupportedDtype`] for a dtype with no float
    /// coercion, or [`ConvertError::ShapeMismatch`] when the data length or
    /// shape does not fit a transform.
    pub fn transform(&self, canonical: String, raw: RawTensor) -> Result<TensorRecord> {
        let mut shape = squeeze(&raw.shape);
        let mut values = decode(&raw)?;
        let source = raw.name;
        let shape_error = |message: String| ConvertError::ShapeMismatch {
            name: source.clone(),
            message,
        };

        if let Some(n_head) = self.head_split(&canonical) {
            values = values
                .head_permute(&shape, n_head, false)
                .map_err(shape_error)?;
        }

        let dtype = target_dtype(self.precision, &canonical, values.dtype(), shape.len());
        values = values.cast(dtype);

        if self.transpose_projections && is_projection(&canonical) {
            let (transposed, transposed_shape) = values.transpose_last(&shape).map_err(shape_error)?;
            values = transposed;
            shape = transposed_shape;
        }

        tracing::debug!(
            source = %source,
            name = %canonical,
            shape = ?shape,
            dtype = %dtype,
            "transformed tensor"
        );

        Ok(TensorRecord {
            name: canonical,
            shape,
            dtype,
            data: values.into_bytes(),
        })
    }

    /// Head count used to undo the interleave of `canonical`, if it has one
    fn head_split(&self, canonical: &str) -> Option<usize> {
        if !self.reverse_qk_permute {
            return None;
        }
        if canonical.ends_with(ATTN_Q_WEIGHT) {
            Some(self.head_count)
        } else if canonical.ends_with(ATTN_K_WEIGHT) {
            Some(self.key_head_split)
        } else {
            None
        }
    }
}

fn is_projection(canonical: &str) -> bool {
    TRANSPOSED_SUFFIXES.iter().any(|suffix| canonical.ends_with(suffix))
}

/// Target dtype of a tensor under `precision`
///
/// Wide output is all f32. Narrow output keeps vectors and the position
/// table in f32, narrows f32 2-D weights to f16 and leaves anything else as
/// it is.
#[must_use]
pub fn target_dtype(
    precision: OutputPrecision,
    canonical: &str,
    current: TensorDtype,
    ndim: usize,
) -> TensorDtype {
    match precision {
        OutputPrecision::Wide => TensorDtype::F32,
        OutputPrecision::Narrow => {
            if canonical == POSITION_EMBD_WEIGHT || ndim == 1 {
                TensorDtype::F32
            } else if current == TensorDtype::F32 && ndim == 2 && canonical.ends_with(".weight") {
                TensorDtype::F16
            } else {
                current
            }
        }
    }
}

/// Undo the HuggingFace rotary interleave of a q/k projection
///
/// Rows are viewed as `(n_head, 2, rows / n_head / 2, ..)` and the two
/// middle axes swapped.
///
/// # Errors
///
/// Returns a message when the rows do not split into `n_head` pairs of
/// halves or the data does not match `shape`.
pub fn reverse_head_permute<T: Clone>(
    data: Vec<T>,
    shape: &[usize],
    n_head: usize,
) -> std::result::Result<Vec<T>, String> {
    head_permute(data, shape, n_head, false)
}

/// Inverse of [`reverse_head_permute`]
///
/// # Errors
///
/// Same as [`reverse_head_permute`].
pub fn apply_head_permute<T: Clone>(
    data: Vec<T>,
    shape: &[usize],
    n_head: usize,
) -> std::result::Result<Vec<T>, String> {
    head_permute(data, shape, n_head, true)
}

fn head_permute<T: Clone>(
    data: Vec<T>,
    shape: &[usize],
    n_head: usize,
    inverse: bool,
) -> std::result::Result<Vec<T>, String> {
    let Some((&rows, inner)) = shape.split_first() else {
        return Err("cannot split heads of a scalar".into());
    };
    if n_head == 0 || rows % (2 * n_head) != 0 {
        return Err(format!(
            "{rows} rows do not split into {n_head} heads of two halves"
        ));
    }
    let half = rows / n_head / 2;
    let rest: usize = inner.iter().product();
    let split = if inverse {
        [n_head, half, 2, rest]
    } else {
        [n_head, 2, half, rest]
    };

    let mut array = ArrayD::from_shape_vec(IxDyn(&split), data).map_err(|e| e.to_string())?;
    array.swap_axes(1, 2);
    Ok(array.iter().cloned().collect())
}

fn transpose_last<T: Clone>(
    data: Vec<T>,
    shape: &[usize],
) -> std::result::Result<(Vec<T>, Vec<usize>), String> {
    let ndim = shape.len();
    if ndim < 2 {
        return Err(format!("cannot transpose a {ndim}-D tensor"));
    }
    let mut array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| e.to_string())?;
    array.swap_axes(ndim - 2, ndim - 1);

    let mut transposed = shape.to_vec();
    transposed.swap(ndim - 2, ndim - 1);
    Ok((array.iter().cloned().collect(), transposed))
}

/// Drop unit dimensions, keeping at least one axis
fn squeeze(shape: &[usize]) -> Vec<usize> {
    let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    if squeezed.is_empty() {
        vec![1]
    } else {
        squeezed
    }
}

fn decode(raw: &RawTensor) -> Result<Values> {
    let Some(size) = raw.dtype.size() else {
        return Err(unsupported(raw));
    };
    let numel: usize = raw.shape.iter().product();
    if raw.data.len() != numel * size {
        return Err(ConvertError::ShapeMismatch {
            name: raw.name.clone(),
            message: format!(
                "{} bytes of data for {numel} {} elements",
                raw.data.len(),
                raw.dtype
            ),
        });
    }

    let bytes = raw.data.as_slice();
    let values = match raw.dtype {
        SourceDtype::F32 => Values::F32(floats(bytes, f32::from_le_bytes)),
        SourceDtype::F16 => Values::F16(
            bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        SourceDtype::BF16 => Values::F32(floats(bytes, |b: [u8; 2]| bf16::from_le_bytes(b).to_f32())),
        SourceDtype::F64 => Values::F32(floats(bytes, |b: [u8; 8]| f64::from_le_bytes(b) as f32)),
        SourceDtype::I8 => Values::F32(floats(bytes, |b: [u8; 1]| f32::from(i8::from_le_bytes(b)))),
        SourceDtype::U8 => Values::F32(floats(bytes, |b: [u8; 1]| f32::from(b[0]))),
        SourceDtype::Bool => Values::F32(floats(bytes, |b: [u8; 1]| f32::from(u8::from(b[0] != 0)))),
        SourceDtype::I16 => Values::F32(floats(bytes, |b: [u8; 2]| f32::from(i16::from_le_bytes(b)))),
        SourceDtype::U16 => Values::F32(floats(bytes, |b: [u8; 2]| f32::from(u16::from_le_bytes(b)))),
        SourceDtype::I32 => Values::F32(floats(bytes, |b: [u8; 4]| i32::from_le_bytes(b) as f32)),
        SourceDtype::U32 => Values::F32(floats(bytes, |b: [u8; 4]| u32::from_le_bytes(b) as f32)),
        SourceDtype::I64 => Values::F32(floats(bytes, |b: [u8; 8]| i64::from_le_bytes(b) as f32)),
        SourceDtype::U64 => Values::F32(floats(bytes, |b: [u8; 8]| u64::from_le_bytes(b) as f32)),
        SourceDtype::Other(_) => return Err(unsupported(raw)),
    };
    Ok(values)
}

fn unsupported(raw: &RawTensor) -> ConvertError {
    ConvertError::UnsupportedDtype {
        name: raw.name.clone(),
        dtype: raw.dtype.to_string(),
    }
}

/// Decode fixed-width little-endian elements to f32
fn floats<const N: usize>(bytes: &[u8], convert: impl Fn([u8; N]) -> f32) -> Vec<f32> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut element = [0u8; N];
            element.copy_from_slice(chunk);
            convert(element)
        })
        .collect()
}
