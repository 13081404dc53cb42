//! Tests for the architecture registry

use super::*;

#[test]
fn test_resolve_known_architectures() {
    assert_eq!(resolve("GPT2LMHeadModel").unwrap().id, ArchId::Gpt2);
    assert_eq!(resolve("LlamaForCausalLM").unwrap().id, ArchId::Llama);
    assert_eq!(resolve("PlamoForCausalLM").unwrap().id, ArchId::Plamo);
}

#[test]
fn test_resolve_unknown_architecture_is_fatal() {
    let err = resolve("MistralForCausalLM").unwrap_err();
    assert!(matches!(err, ConvertError::UnsupportedArchitecture { ref tag } if tag == "MistralForCausalLM"));
}

#[test]
fn test_resolve_is_case_sensitive() {
    assert!(resolve("llamaforcausallm").is_err());
}

#[test]
fn test_by_gguf_name() {
    assert_eq!(by_gguf_name("plamo").map(|d| d.id), Some(ArchId::Plamo));
    assert!(by_gguf_name("falcon").is_none());
}

#[test]
fn test_registry_names_are_unique() {
    let all = registry();
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a.hf_class, b.hf_class);
            assert_ne!(a.gguf_name, b.gguf_name);
        }
    }
}

#[test]
fn test_exclusions_cover_derivable_buffers() {
    assert!(LLAMA.is_excluded("model.layers.3.self_attn.rotary_emb.inv_freq"));
    assert!(GPT2.is_excluded("h.0.attn.bias"));
    assert!(GPT2.is_excluded("transformer.h.11.attn.masked_bias"));
    assert!(!GPT2.is_excluded("h.0.attn.c_attn.bias"));
    assert!(!LLAMA.is_excluded("model.layers.0.self_attn.q_proj.weight"));
}

#[test]
fn test_key_is_namespaced() {
    assert_eq!(LLAMA.key("context_length"), "llama.context_length");
    assert_eq!(GPT2.key("attention.head_count"), "gpt2.attention.head_count");
}

#[test]
fn test_layout_hooks_per_family() {
    assert!(LLAMA.reverse_qk_permute && !LLAMA.transpose_projections);
    assert!(GPT2.transpose_projections && !GPT2.reverse_qk_permute);
    assert!(!PLAMO.reverse_qk_permute && !PLAMO.transpose_projections);
}

#[test]
fn test_plamo_requires_piece_model_and_fixes_special_ids() {
    assert!(PLAMO.requires_piece_model);
    assert!(PLAMO
        .fixed_special_tokens
        .contains(&(SpecialToken::Sep, 5)));
    assert!(PLAMO
        .fixed_special_tokens
        .contains(&(SpecialToken::Pad, 3)));
}

#[test]
fn test_tables_use_block_placeholder_consistently() {
    for desc in registry() {
        for (source, canonical) in desc.tensor_table {
            assert_eq!(
                source.contains(BLOCK_PLACEHOLDER),
                canonical.contains(BLOCK_PLACEHOLDER),
                "{}: {source} -> {canonical}",
                desc.gguf_name
            );
        }
    }
}
