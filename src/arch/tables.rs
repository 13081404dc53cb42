//! Per-family descriptors and canonical tensor-name tables.

use super::{
    ArchId, ArchitectureDescriptor, FieldAliases, KvHeadRule, NormKind,
    COMMON_EXCLUDED_SUFFIXES,
};
use crate::vocab::SpecialToken;

/// GPT-2: fused QKV, Conv1D projections stored `[in, out]`, learned positions
pub static GPT2: ArchitectureDescriptor = ArchitectureDescriptor {
    id: ArchId::Gpt2,
    hf_class: "GPT2LMHeadModel",
    gguf_name: "gpt2",
    display_name: None,
    fields: FieldAliases {
        block_count: &["n_layer", "num_hidden_layers"],
        embedding_length: &["n_embd", "hidden_size"],
        head_count: &["n_head", "num_attention_heads"],
        context_length: &["n_positions", "n_ctx", "max_position_embeddings"],
        feed_forward_length: &["n_inner"],
        norm_eps: &["layer_norm_epsilon", "layer_norm_eps"],
    },
    context_length_default: None,
    feed_forward_multiplier: Some(4),
    kv_heads: KvHeadRule::SameAsHeads,
    norm: NormKind::LayerNorm,
    uses_rope: false,
    parallel_residual: Some(("use_parallel_residual", true)),
    tensor_data_layout: None,
    tensor_table: GPT2_TENSORS,
    excluded_suffixes: COMMON_EXCLUDED_SUFFIXES,
    reverse_qk_permute: false,
    transpose_projections: true,
    requires_piece_model: false,
    fixed_special_tokens: &[],
};

/// LLaMA: separate q/k/v, HF-interleaved q/k heads, optional GQA
pub static LLAMA: ArchitectureDescriptor = ArchitectureDescriptor {
    id: ArchId::Llama,
    hf_class: "LlamaForCausalLM",
    gguf_name: "llama",
    display_name: None,
    fields: FieldAliases {
        block_count: &["num_hidden_layers"],
        embedding_length: &["hidden_size"],
        head_count: &["num_attention_heads"],
        context_length: &["max_sequence_length", "max_position_embeddings"],
        feed_forward_length: &["intermediate_size"],
        norm_eps: &["rms_norm_eps"],
    },
    context_length_default: None,
    feed_forward_multiplier: None,
    kv_heads: KvHeadRule::Explicit(&["num_key_value_heads"]),
    norm: NormKind::RmsNorm,
    uses_rope: true,
    parallel_residual: None,
    tensor_data_layout: Some("Meta AI original pth"),
    tensor_table: LLAMA_TENSORS,
    excluded_suffixes: COMMON_EXCLUDED_SUFFIXES,
    reverse_qk_permute: true,
    transpose_projections: false,
    requires_piece_model: false,
    fixed_special_tokens: &[],
};

/// PLaMo: parallel attention/MLP off a single norm, shared kv heads
pub static PLAMO: ArchitectureDescriptor = ArchitectureDescriptor {
    id: ArchId::Plamo,
    hf_class: "PlamoForCausalLM",
    gguf_name: "plamo",
    display_name: Some("PLaMo"),
    fields: FieldAliases {
        block_count: &["num_hidden_layers"],
        embedding_length: &["hidden_size"],
        head_count: &["num_attention_heads"],
        // not in config.json
        context_length: &[],
        feed_forward_length: &["intermediate_size"],
        norm_eps: &["rms_norm_eps"],
    },
    context_length_default: Some(4096),
    feed_forward_multiplier: None,
    kv_heads: KvHeadRule::SharedHeadRatio {
        ratio_key: "n_shared_head",
        fallback: &["num_key_value_heads"],
    },
    norm: NormKind::RmsNorm,
    uses_rope: true,
    parallel_residual: None,
    tensor_data_layout: None,
    tensor_table: PLAMO_TENSORS,
    excluded_suffixes: COMMON_EXCLUDED_SUFFIXES,
    reverse_qk_permute: false,
    transpose_projections: false,
    requires_piece_model: true,
    fixed_special_tokens: &[(SpecialToken::Sep, 5), (SpecialToken::Pad, 3)],
};

const GPT2_TENSORS: &[(&str, &str)] = &[
    ("transformer.wte", "token_embd"),
    ("wte", "token_embd"),
    ("transformer.wpe", "position_embd"),
    ("wpe", "position_embd"),
    ("transformer.ln_f", "output_norm"),
    ("ln_f", "output_norm"),
    ("lm_head", "output"),
    ("transformer.h.{bid}.ln_1", "blk.{bid}.attn_norm"),
    ("h.{bid}.ln_1", "blk.{bid}.attn_norm"),
    ("transformer.h.{bid}.attn.c_attn", "blk.{bid}.attn_qkv"),
    ("h.{bid}.attn.c_attn", "blk.{bid}.attn_qkv"),
    ("transformer.h.{bid}.attn.c_proj", "blk.{bid}.attn_output"),
    ("h.{bid}.attn.c_proj", "blk.{bid}.attn_output"),
    ("transformer.h.{bid}.ln_2", "blk.{bid}.ffn_norm"),
    ("h.{bid}.ln_2", "blk.{bid}.ffn_norm"),
    ("transformer.h.{bid}.mlp.c_fc", "blk.{bid}.ffn_up"),
    ("h.{bid}.mlp.c_fc", "blk.{bid}.ffn_up"),
    ("transformer.h.{bid}.mlp.c_proj", "blk.{bid}.ffn_down"),
    ("h.{bid}.mlp.c_proj", "blk.{bid}.ffn_down"),
];

const LLAMA_TENSORS: &[(&str, &str)] = &[
    ("model.embed_tokens", "token_embd"),
    ("model.norm", "output_norm"),
    ("lm_head", "output"),
    ("model.layers.{bid}.input_layernorm", "blk.{bid}.attn_norm"),
    ("model.layers.{bid}.self_attn.q_proj", "blk.{bid}.attn_q"),
    ("model.layers.{bid}.self_attn.k_proj", "blk.{bid}.attn_k"),
    ("model.layers.{bid}.self_attn.v_proj", "blk.{bid}.attn_v"),
    ("model.layers.{bid}.self_attn.o_proj", "blk.{bid}.attn_output"),
    ("model.layers.{bid}.post_attention_layernorm", "blk.{bid}.ffn_norm"),
    ("model.layers.{bid}.mlp.gate_proj", "blk.{bid}.ffn_gate"),
    ("model.layers.{bid}.mlp.up_proj", "blk.{bid}.ffn_up"),
    ("model.layers.{bid}.mlp.down_proj", "blk.{bid}.ffn_down"),
];

const PLAMO_TENSORS: &[(&str, &str)] = &[
    ("model.embed_tokens", "token_embd"),
    ("model.norm", "output_norm"),
    ("lm_head", "output"),
    ("model.layers.layers.{bid}.norm", "blk.{bid}.attn_norm"),
    ("model.layers.{bid}.input_layernorm", "blk.{bid}.attn_norm"),
    ("model.layers.layers.{bid}.self_attn.q_proj", "blk.{bid}.attn_q"),
    ("model.layers.{bid}.self_attn.q_proj", "blk.{bid}.attn_q"),
    ("model.layers.layers.{bid}.self_attn.k_proj", "blk.{bid}.attn_k"),
    ("model.layers.{bid}.self_attn.k_proj", "blk.{bid}.attn_k"),
    ("model.layers.layers.{bid}.self_attn.v_proj", "blk.{bid}.attn_v"),
    ("model.layers.{bid}.self_attn.v_proj", "blk.{bid}.attn_v"),
    ("model.layers.layers.{bid}.self_attn.o_proj", "blk.{bid}.attn_output"),
    ("model.layers.{bid}.self_attn.o_proj", "blk.{bid}.attn_output"),
    ("model.layers.layers.{bid}.mlp.gate_proj", "blk.{bid}.ffn_gate"),
    ("model.layers.{bid}.mlp.gate_proj", "blk.{bid}.ffn_gate"),
    ("model.layers.layers.{bid}.mlp.up_proj", "blk.{bid}.ffn_up"),
    ("model.layers.{bid}.mlp.up_proj", "blk.{bid}.ffn_up"),
    ("model.layers.layers.{bid}.mlp.down_proj", "blk.{bid}.ffn_down"),
    ("model.layers.{bid}.mlp.down_proj", "blk.{bid}.ffn_down"),
];
