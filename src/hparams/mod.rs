//! Typed hyperparameters
//!
//! [`HyperParams::extract`] validates a `config.json` record against an
//! [`ArchitectureDescriptor`] once, resolving aliases and documented
//! defaults, and produces a closed structure. Nothing downstream touches the
//! untyped record again.

mod config;


pub use config::{ConfigRecord, CONFIG_FILE};

use crate::arch::{ArchitectureDescriptor, KvHeadRule};
use crate::error::{ConvertError, Result};
use crate::vocab::{SpecialToken, SpecialTokens};
use serde_json::Value;

/// Rope scaling kinds that produce metadata
const LINEAR_ROPE_SCALING: &str = "linear";

/// Validated hyperparameters for one checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct HyperParams {
    /// Transformer blocks
    pub block_count: u32,
    /// Embedding width
    pub embedding_length: u32,
    /// Attention heads
    pub head_count: u32,
    /// Key/value heads (equals `head_count` without grouped-query attention)
    pub head_count_kv: u32,
    /// Maximum context length
    pub context_length: u32,
    /// Feed-forward width
    pub feed_forward_length: u32,
    /// Normalization epsilon
    pub norm_eps: f32,
    /// Rotary dimension, for rotary architectures
    pub rope_dimension_count: Option<u32>,
    /// Linear rope scale factor
    pub rope_scale_linear: Option<f32>,
    /// Parallel residual flag, for architectures that declare one
    pub parallel_residual: Option<bool>,
    /// Declared vocabulary size
    pub vocab_size: Option<usize>,
    /// Source repository (`_name_or_path`)
    pub source_repo: Option<String>,
    /// Special-token ids declared in the config
    pub special_tokens: SpecialTokens,
}

impl HyperParams {
    /// Extract and validate hyperparameters for `desc` from `record`
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingHyperParam`] for a required field with
    /// no alias present and no default, or [`ConvertError::InvalidHyperParam`]
    /// for malformed or inconsistent values.
    pub fn extract(desc: &ArchitectureDescriptor, record: &ConfigRecord) -> Result<Self> {
        let fields = &desc.fields;

        let block_count = record.require_u32(fields.block_count)?;
        let embedding_length = record.require_u32(fields.embedding_length)?;
        let head_count = record.require_u32(fields.head_count)?;

        let context_length = match record.positive_u32(fields.context_length)? {
            Some(ctx) => ctx,
            None => desc
                .context_length_default
                .and_then(|ctx| u32::try_from(ctx).ok())
                .ok_or_else(|| config::missing(fields.context_length))?,
        };

        let feed_forward_length = match record.positive_u32(fields.feed_forward_length)? {
            Some(ffn) => ffn,
            None => desc
                .feed_forward_multiplier
                .and_then(|mult| u32::try_from(u64::from(embedding_length) * mult).ok())
                .ok_or_else(|| config::missing(fields.feed_forward_length))?,
        };

        let norm_eps = record
            .f32(fields.norm_eps)?
            .ok_or_else(|| config::missing(fields.norm_eps))?;

        let head_count_kv = derive_kv_heads(desc.kv_heads, record, head_count)?;

        let rope_dimension_count = if desc.uses_rope {
            if embedding_length % head_count != 0 {
                return Err(ConvertError::InvalidHyperParam {
                    key: fields.head_count.join("/"),
                    message: format!(
                        "embedding width {embedding_length} is not divisible by {head_count} heads"
                    ),
                });
            }
            Some(embedding_length / head_count)
        } else {
            None
        };

        let parallel_residual = match desc.parallel_residual {
            Some((key, default)) => Some(record.bool(key)?.unwrap_or(default)),
            None => None,
        };

        let vocab_size = record
            .positive_u32(&["vocab_size"])?
            .map(|size| size as usize);

        Ok(Self {
            block_count,
            embedding_length,
            head_count,
            head_count_kv,
            context_length,
            feed_forward_length,
            norm_eps,
            rope_dimension_count,
            rope_scale_linear: rope_scale_linear(record),
            parallel_residual,
            vocab_size,
            source_repo: record.string("_name_or_path").map(str::to_string),
            special_tokens: config_special_tokens(record)?,
        })
    }

    /// Per-head width
    #[must_use]
    pub fn head_dim(&self) -> u32 {
        self.embedding_length / self.head_count
    }

    /// Whether keys/values are shared across groups of query heads
    #[must_use]
    pub fn is_grouped_query(&self) -> bool {
        self.head_count_kv != self.head_count
    }
}

fn derive_kv_heads(rule: KvHeadRule, record: &ConfigRecord, head_count: u32) -> Result<u32> {
    let kv = match rule {
        KvHeadRule::SameAsHeads => head_count,
        KvHeadRule::Explicit(aliases) => record.positive_u32(aliases)?.unwrap_or(head_count),
        KvHeadRule::SharedHeadRatio {
            ratio_key,
            fallback,
        } => match record.positive_u32(&[ratio_key])? {
            Some(shared) => {
                if head_count % shared != 0 {
                    return Err(ConvertError::InvalidHyperParam {
                        key: ratio_key.to_string(),
                        message: format!("{head_count} heads are not divisible by {shared}"),
                    });
                }
                head_count / shared
            }
            None => record.positive_u32(fallback)?.unwrap_or(head_count),
        },
    };

    if kv > head_count || head_count % kv != 0 {
        return Err(ConvertError::InvalidHyperParam {
            key: "num_key_value_heads".into(),
            message: format!("{kv} key/value heads cannot group {head_count} query heads"),
        });
    }
    Ok(kv)
}

/// Linear rope scale factor; any other scaling kind is ignored
fn rope_scale_linear(record: &ConfigRecord) -> Option<f32> {
    let scaling = record.get("rope_scaling")?;
    let Some(scaling) = scaling.as_object() else {
        tracing::warn!(value = %scaling, "ignoring malformed rope_scaling record");
        return None;
    };
    let kind = scaling
        .get("type")
        .or_else(|| scaling.get("rope_type"))
        .and_then(Value::as_str);
    let factor = scaling.get("factor").and_then(Value::as_f64);

    match (kind, factor) {
        (Some(LINEAR_ROPE_SCALING), Some(factor)) => Some(factor as f32),
        (Some(LINEAR_ROPE_SCALING), None) => {
            tracing::warn!("linear rope_scaling without a factor, ignoring");
            None
        }
        (kind, _) => {
            tracing::warn!(kind = kind.unwrap_or("<none>"), "ignoring unrecognized rope_scaling kind");
            None
        }
    }
}

fn config_special_tokens(record: &ConfigRecord) -> Result<SpecialTokens> {
    let mut tokens = SpecialTokens::default();
    for token in SpecialToken::ALL {
        if let Some(id) = record.token_id(token.config_id_key())? {
            tokens.set(token, id);
        }
    }
    Ok(tokens)
}
