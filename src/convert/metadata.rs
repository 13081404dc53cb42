//! Metadata emission

use super::ConversionContext;
use crate::arch::{ArchitectureDescriptor, KvHeadRule, NormKind};
use crate::error::Result;
use crate::tensor::OutputPrecision;
use crate::vocab::Vocabulary;
use crate::writer::{MetadataValue, ModelWriter};
use std::path::Path;

/// `general.name` for a checkpoint directory
///
/// A fixed display name wins; otherwise the directory's own name, falling
/// back to the architecture name when the path has none.
#[must_use]
pub fn model_name(model_dir: &Path, desc: &ArchitectureDescriptor) -> String {
    if let Some(name) = desc.display_name {
        return name.to_string();
    }
    let dir_name = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    };
    dir_name(model_dir)
        .or_else(|| model_dir.canonicalize().ok().as_deref().and_then(dir_name))
        .unwrap_or_else(|| desc.gguf_name.to_string())
}

/// Emit the `general.*` and `{arch}.*` keys
///
/// # Errors
///
/// Propagates writer errors.
pub fn emit_architecture_metadata<W: ModelWriter + ?Sized>(
    ctx: &ConversionContext,
    precision: OutputPrecision,
    writer: &mut W,
) -> Result<()> {
    let desc = ctx.desc;
    let hp = &ctx.hparams;

    writer.set_architecture_name(desc.gguf_name)?;
    writer.add_metadata(
        "general.name",
        MetadataValue::String(model_name(&ctx.model_dir, desc)),
    )?;
    if let Some(repo) = &hp.source_repo {
        writer.add_metadata("general.source.hf_repo", MetadataValue::String(repo.clone()))?;
    }
    if let Some(layout) = desc.tensor_data_layout {
        writer.add_metadata(
            "general.tensor_data_layout",
            MetadataValue::String(layout.to_string()),
        )?;
    }
    writer.add_metadata("general.file_type", MetadataValue::U32(precision.file_type()))?;

    writer.add_metadata(&desc.key("context_length"), MetadataValue::U32(hp.context_length))?;
    writer.add_metadata(&desc.key("embedding_length"), MetadataValue::U32(hp.embedding_length))?;
    writer.add_metadata(&desc.key("block_count"), MetadataValue::U32(hp.block_count))?;
    writer.add_metadata(
        &desc.key("feed_forward_length"),
        MetadataValue::U32(hp.feed_forward_length),
    )?;
    if let Some(dims) = hp.rope_dimension_count {
        writer.add_metadata(&desc.key("rope.dimension_count"), MetadataValue::U32(dims))?;
    }
    if let Some(scale) = hp.rope_scale_linear {
        writer.add_metadata(&desc.key("rope.scale_linear"), MetadataValue::F32(scale))?;
    }
    writer.add_metadata(&desc.key("attention.head_count"), MetadataValue::U32(hp.head_count))?;
    if desc.kv_heads != KvHeadRule::SameAsHeads {
        writer.add_metadata(
            &desc.key("attention.head_count_kv"),
            MetadataValue::U32(hp.head_count_kv),
        )?;
    }
    let eps_key = match desc.norm {
        NormKind::LayerNorm => "attention.layer_norm_epsilon",
        NormKind::RmsNorm => "attention.layer_norm_rms_epsilon",
    };
    writer.add_metadata(&desc.key(eps_key), MetadataValue::F32(hp.norm_eps))?;
    if let Some(parallel) = hp.parallel_residual {
        writer.add_metadata(&desc.key("use_parallel_residual"), MetadataValue::Bool(parallel))?;
    }
    Ok(())
}

/// Emit the `tokenizer.ggml.*` keys
///
/// # Errors
///
/// Propagates writer errors.
pub fn emit_vocabulary<W: ModelWriter + ?Sized>(vocab: &Vocabulary, writer: &mut W) -> Result<()> {
    writer.add_metadata(
        "tokenizer.ggml.model",
        MetadataValue::String(vocab.model.as_str().to_string()),
    )?;

    let mut tokens = Vec::with_capacity(vocab.len());
    let mut scores = Vec::with_capacity(vocab.len());
    let mut kinds = Vec::with_capacity(vocab.len());
    for entry in &vocab.entries {
        tokens.push(entry.text.clone());
        scores.push(entry.score);
        kinds.push(entry.kind.code());
    }
    writer.add_token_list(tokens)?;
    writer.add_token_scores(scores)?;
    writer.add_token_types(kinds)?;

    if !vocab.merges.is_empty() {
        writer.add_metadata(
            "tokenizer.ggml.merges",
            MetadataValue::strings(vocab.merges.iter().cloned()),
        )?;
    }
    for (token, id) in vocab.special_tokens.iter() {
        writer.add_metadata(token.gguf_key(), MetadataValue::U32(id))?;
    }
    Ok(())
}
