//! Conversion result summary

use crate::tensor::{TensorDtype, TensorRecord};
use std::collections::BTreeMap;

/// What a conversion run emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// GGUF architecture name
    pub architecture: &'static str,
    /// Tensors handed to the writer
    pub tensors: usize,
    /// Derivable buffers dropped before mapping
    pub skipped: usize,
    /// Vocabulary entries
    pub vocab_size: usize,
    /// Emitted tensors per dtype
    pub dtype_counts: BTreeMap<TensorDtype, usize>,
    /// Tensor payload bytes
    pub data_bytes: u64,
}

impl ConversionReport {
    #[must_use]
    pub fn new(architecture: &'static str, vocab_size: usize) -> Self {
        Self {
            architecture,
            tensors: 0,
            skipped: 0,
            vocab_size,
            dtype_counts: BTreeMap::new(),
            data_bytes: 0,
        }
    }

    /// Count one emitted tensor
    pub fn record(&mut self, tensor: &TensorRecord) {
        self.tensors += 1;
        *self.dtype_counts.entry(tensor.dtype).or_insert(0) += 1;
        self.data_bytes += tensor.data.len() as u64;
    }

    /// Emitted tensors of `dtype`
    #[must_use]
    pub fn count(&self, dtype: TensorDtype) -> usize {
        self.dtype_counts.get(&dtype).copied().unwrap_or(0)
    }

    /// Payload size as a human-readable string
    #[must_use]
    pub fn size_human(&self) -> String {
        let bytes = self.data_bytes;
        if bytes >= 1_000_000_000 {
            format!("{:.2} GB", bytes as f64 / 1e9)
        } else if bytes >= 1_000_000 {
            format!("{:.2} MB", bytes as f64 / 1e6)
        } else if bytes >= 1_000 {
            format!("{:.2} KB", bytes as f64 / 1e3)
        } else {
            format!("{bytes} B")
        }
    }
}

impl std::fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} tensors ({} skipped), {} vocabulary entries, {}",
            self.architecture,
            self.tensors,
            self.skipped,
            self.vocab_size,
            self.size_human()
        )?;
        for (dtype, count) in &self.dtype_counts {
            write!(f, ", {count} {dtype}")?;
        }
        Ok(())
    }
}
