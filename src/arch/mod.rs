//! Architecture registry
//!
//! One immutable [`ArchitectureDescriptor`] per supported model family. A
//! descriptor carries everything that differs between families: where each
//! hyperparameter lives in `config.json`, the canonical tensor-name table,
//! which tensor keys are derivable buffers, and the layout hooks the
//! transformer applies.
//!
//! # Example
//!
//! ```
//! use convertir::arch;
//!
//! let desc = arch::resolve("LlamaForCausalLM").unwrap();
//! assert_eq!(desc.gguf_name, "llama");
//! assert!(desc.reverse_qk_permute);
//! ```

mod tables;

#[cfg(test)]
mod tests;

use crate::error::{ConvertError, Result};
use crate::vocab::SpecialToken;

pub use tables::{GPT2, LLAMA, PLAMO};

/// Placeholder for the block index inside tensor-name templates
pub const BLOCK_PLACEHOLDER: &str = "{bid}";

/// Buffers that are derivable constants in every family, never learned weights
pub const COMMON_EXCLUDED_SUFFIXES: &[&str] = &[
    ".rotary_emb.inv_freq",
    ".attn.bias",
    ".attn.masked_bias",
    ".attention.bias",
    ".attention.masked_bias",
];

/// Supported model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchId {
    /// OpenAI GPT-2
    Gpt2,
    /// Meta LLaMA and derivatives
    Llama,
    /// Preferred Networks PLaMo
    Plamo,
}

/// Normalization flavour, which decides the epsilon metadata key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormKind {
    /// LayerNorm (`attention.layer_norm_epsilon`)
    LayerNorm,
    /// RMSNorm (`attention.layer_norm_rms_epsilon`)
    RmsNorm,
}

/// How the key/value head count is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvHeadRule {
    /// No grouped-query attention: kv heads equal heads
    SameAsHeads,
    /// Read from the first present alias, default to heads
    Explicit(&'static [&'static str]),
    /// heads / `ratio_key`; falls back to `fallback` aliases, then heads
    SharedHeadRatio {
        ratio_key: &'static str,
        fallback: &'static [&'static str],
    },
}

/// Where each required hyperparameter may appear in `config.json`
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub block_count: &'static [&'static str],
    pub embedding_length: &'static [&'static str],
    pub head_count: &'static [&'static str],
    pub context_length: &'static [&'static str],
    pub feed_forward_length: &'static [&'static str],
    pub norm_eps: &'static [&'static str],
}

/// Static description of one model family
#[derive(Debug)]
pub struct ArchitectureDescriptor {
    /// Family identifier
    pub id: ArchId,
    /// Class name in `config.json` `architectures[0]`
    pub hf_class: &'static str,
    /// Architecture name written to `general.architecture`
    pub gguf_name: &'static str,
    /// Fixed `general.name`; `None` uses the model directory name
    pub display_name: Option<&'static str>,
    /// Hyperparameter aliases
    pub fields: FieldAliases,
    /// Context length when no alias is present
    pub context_length_default: Option<u64>,
    /// Feed-forward width as a multiple of the embedding width, when absent
    pub feed_forward_multiplier: Option<u64>,
    /// Key/value head derivation
    pub kv_heads: KvHeadRule,
    /// Normalization flavour
    pub norm: NormKind,
    /// Rotary position embeddings (emit `rope.dimension_count`)
    pub uses_rope: bool,
    /// `config.json` key for the parallel-residual flag, with its default
    pub parallel_residual: Option<(&'static str, bool)>,
    /// Value for `general.tensor_data_layout`
    pub tensor_data_layout: Option<&'static str>,
    /// `(source stem, canonical stem)` templates, `{bid}` = block index
    pub tensor_table: &'static [(&'static str, &'static str)],
    /// Key suffixes dropped before mapping
    pub excluded_suffixes: &'static [&'static str],
    /// Undo the HuggingFace q/k head interleave
    pub reverse_qk_permute: bool,
    /// Transpose projection weights stored input-major (Conv1D)
    pub transpose_projections: bool,
    /// Conversion requires `tokenizer.model`
    pub requires_piece_model: bool,
    /// Special-token ids that override anything read from the tokenizer
    pub fixed_special_tokens: &'static [(SpecialToken, u32)],
}

impl ArchitectureDescriptor {
    /// Whether `key` is a derivable buffer that must not be emitted
    #[must_use]
    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded_suffixes.iter().any(|suffix| key.ends_with(suffix))
    }

    /// Metadata key namespaced under this architecture
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.gguf_name)
    }
}

/// All supported families
#[must_use]
pub fn registry() -> &'static [&'static ArchitectureDescriptor] {
    static ALL: [&ArchitectureDescriptor; 3] = [&GPT2, &LLAMA, &PLAMO];
    &ALL
}

/// Resolve a `config.json` architecture tag against the registry
///
/// # Errors
///
/// Returns [`ConvertError::UnsupportedArchitecture`] for any tag that is not
/// a registered HuggingFace class name.
pub fn resolve(tag: &str) -> Result<&'static ArchitectureDescriptor> {
    registry()
        .iter()
        .copied()
        .find(|desc| desc.hf_class == tag)
        .ok_or_else(|| ConvertError::UnsupportedArchitecture {
            tag: tag.to_string(),
        })
}

/// Look a descriptor up by its GGUF architecture name
#[must_use]
pub fn by_gguf_name(name: &str) -> Option<&'static ArchitectureDescriptor> {
    registry().iter().copied().find(|desc| desc.gguf_name == name)
}
