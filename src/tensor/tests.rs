//! Tests for name mapping and layout transforms

use super::*;
use crate::arch::{GPT2, LLAMA, PLAMO};
use crate::error::ConvertError;
use crate::hparams::{ConfigRecord, HyperParams};
use half::f16;
use proptest::prelude::*;
use serde_json::json;

fn f32_raw(name: &str, shape: &[usize], values: &[f32]) -> RawTensor {
    RawTensor {
        name: name.to_string(),
        dtype: SourceDtype::F32,
        shape: shape.to_vec(),
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn as_f32(record: &TensorRecord) -> Vec<f32> {
    assert_eq!(record.dtype, TensorDtype::F32);
    record
        .data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn llama_hparams(heads: u32, kv_heads: u32, hidden: u32) -> HyperParams {
    let record = ConfigRecord::from_value(
        "config.json",
        json!({
            "architectures": ["LlamaForCausalLM"],
            "hidden_size": hidden,
            "intermediate_size": hidden * 2,
            "num_attention_heads": heads,
            "num_key_value_heads": kv_heads,
            "num_hidden_layers": 2,
            "max_position_embeddings": 64,
            "rms_norm_eps": 1e-6,
        }),
    )
    .unwrap();
    HyperParams::extract(&LLAMA, &record).unwrap()
}

fn gpt2_hparams() -> HyperParams {
    let record = ConfigRecord::from_value(
        "config.json",
        json!({
            "architectures": ["GPT2LMHeadModel"],
            "n_layer": 2,
            "n_embd": 4,
            "n_head": 2,
            "n_positions": 8,
            "layer_norm_epsilon": 1e-5,
        }),
    )
    .unwrap();
    HyperParams::extract(&GPT2, &record).unwrap()
}

// =========================================================================
// Name mapping
// =========================================================================

#[test]
fn test_llama_names() {
    let mapper = TensorNameMapper::new(&LLAMA, 2);
    assert_eq!(
        mapper.map("model.layers.1.self_attn.q_proj.weight").unwrap(),
        MappedName::Canonical("blk.1.attn_q.weight".into())
    );
    assert_eq!(
        mapper.map("model.embed_tokens.weight").unwrap(),
        MappedName::Canonical("token_embd.weight".into())
    );
    assert_eq!(
        mapper.map("lm_head.weight").unwrap(),
        MappedName::Canonical("output.weight".into())
    );
}

#[test]
fn test_key_without_param_suffix_is_unmapped() {
    let mapper = TensorNameMapper::new(&LLAMA, 1);
    for key in ["lm_head", "model.norm", "model.layers.0.self_attn.q_proj"] {
        let err = mapper.map(key).unwrap_err();
        assert!(matches!(err, ConvertError::UnmappedTensor { ref name } if name == key));
    }
}

#[test]
fn test_bias_suffix_is_reattached() {
    let mapper = TensorNameMapper::new(&GPT2, 1);
    assert_eq!(
        mapper.map("h.0.attn.c_attn.bias").unwrap(),
        MappedName::Canonical("blk.0.attn_qkv.bias".into())
    );
    assert_eq!(
        mapper.map("transformer.wpe.weight").unwrap(),
        MappedName::Canonical("position_embd.weight".into())
    );
}

#[test]
fn test_block_beyond_count_is_unmapped() {
    let mapper = TensorNameMapper::new(&LLAMA, 2);
    let err = mapper.map("model.layers.2.mlp.up_proj.weight").unwrap_err();
    assert!(matches!(
        err,
        ConvertError::UnmappedTensor { ref name } if name == "model.layers.2.mlp.up_proj.weight"
    ));
}

#[test]
fn test_excluded_keys_are_skipped() {
    let mapper = TensorNameMapper::new(&LLAMA, 1);
    assert_eq!(
        mapper.map("model.layers.0.self_attn.rotary_emb.inv_freq").unwrap(),
        MappedName::Skip
    );
    let mapper = TensorNameMapper::new(&GPT2, 1);
    assert_eq!(mapper.map("h.0.attn.masked_bias").unwrap(), MappedName::Skip);
}

#[test]
fn test_unknown_key_is_fatal() {
    let mapper = TensorNameMapper::new(&LLAMA, 1);
    assert!(matches!(
        mapper.map("model.layers.0.mystery.weight"),
        Err(ConvertError::UnmappedTensor { .. })
    ));
}

#[test]
fn test_plamo_nested_layer_names() {
    let mapper = TensorNameMapper::new(&PLAMO, 1);
    assert_eq!(
        mapper.map("model.layers.layers.0.norm.weight").unwrap(),
        MappedName::Canonical("blk.0.attn_norm.weight".into())
    );
    assert_eq!(
        mapper.map("model.layers.layers.0.mlp.down_proj.weight").unwrap(),
        MappedName::Canonical("blk.0.ffn_down.weight".into())
    );
}

#[test]
fn test_mapper_expands_every_block() {
    let mapper = TensorNameMapper::new(&LLAMA, 4);
    // 3 global stems plus 9 per block
    assert_eq!(mapper.len(), 3 + 9 * 4);
}

// =========================================================================
// Head permutation
// =========================================================================

#[test]
fn test_reverse_head_permute_known_layout() {
    // one head, 4 rows: halves (0,1) and (2,3) interleave to 0,2,1,3
    let data: Vec<u32> = vec![0, 1, 2, 3];
    let out = reverse_head_permute(data, &[4], 1).unwrap();
    assert_eq!(out, vec![0, 2, 1, 3]);
}

#[test]
fn test_reverse_head_permute_with_columns() {
    let data: Vec<u32> = (0..8).collect();
    // rows 0..4 of width 2
    let out = reverse_head_permute(data, &[4, 2], 1).unwrap();
    assert_eq!(out, vec![0, 1, 4, 5, 2, 3, 6, 7]);
}

#[test]
fn test_head_permute_rejects_indivisible_rows() {
    let data: Vec<u32> = (0..6).collect();
    assert!(reverse_head_permute(data, &[6], 2).is_err());
    assert!(reverse_head_permute(Vec::<u32>::new(), &[], 1).is_err());
}

#[test]
fn test_head_permute_is_involution_for_four_rows_per_head() {
    let data: Vec<u32> = (0..24).collect();
    let once = reverse_head_permute(data.clone(), &[8, 3], 2).unwrap();
    let twice = reverse_head_permute(once, &[8, 3], 2).unwrap();
    assert_eq!(twice, data);
}

#[test]
fn test_head_permute_is_not_involution_in_general() {
    let data: Vec<u32> = (0..12).collect();
    let once = reverse_head_permute(data.clone(), &[12], 1).unwrap();
    let twice = reverse_head_permute(once, &[12], 1).unwrap();
    assert_ne!(twice, data);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_head_permute_round_trips(
        n_head in 1usize..5,
        half in 1usize..5,
        cols in 1usize..4,
    ) {
        let rows = n_head * 2 * half;
        let shape = [rows, cols];
        let data: Vec<u32> = (0..(rows * cols) as u32).collect();
        let reversed = reverse_head_permute(data.clone(), &shape, n_head).unwrap();
        let restored = apply_head_permute(reversed, &shape, n_head).unwrap();
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn prop_wide_is_always_f32(ndim in 1usize..4, f16_in in any::<bool>()) {
        let current = if f16_in { TensorDtype::F16 } else { TensorDtype::F32 };
        prop_assert_eq!(
            target_dtype(OutputPrecision::Wide, "blk.0.ffn_up.weight", current, ndim),
            TensorDtype::F32
        );
    }
}

// =========================================================================
// Dtype policy
// =========================================================================

#[test]
fn test_narrow_policy_table() {
    use OutputPrecision::Narrow;
    use TensorDtype::{F16, F32};

    let cases = [
        ("blk.0.attn_q.weight", F32, 2, F16),
        ("blk.0.attn_q.weight", F16, 2, F16),
        ("blk.0.attn_norm.weight", F16, 1, F32),
        ("blk.0.attn_norm.weight", F32, 1, F32),
        ("blk.0.attn_qkv.bias", F32, 1, F32),
        ("position_embd.weight", F16, 2, F32),
        ("position_embd.weight", F32, 2, F32),
        ("blk.0.attn_qkv.bias", F32, 2, F32),
        ("blk.0.attn_q.weight", F32, 3, F32),
    ];
    for (name, current, ndim, expected) in cases {
        assert_eq!(target_dtype(Narrow, name, current, ndim), expected, "{name} {current} {ndim}-D");
    }
}

// =========================================================================
// Full transform
// =========================================================================

#[test]
fn test_transform_reverses_q_heads() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let raw = f32_raw("model.layers.0.self_attn.q_proj.weight", &[4, 1], &[0.0, 1.0, 2.0, 3.0]);
    let record = transformer.transform("blk.0.attn_q.weight".into(), raw).unwrap();
    // unit column squeezed away
    assert_eq!(record.shape, vec![4]);
    assert_eq!(as_f32(&record), vec![0.0, 2.0, 1.0, 3.0]);
}

#[test]
fn test_transform_k_uses_head_ratio_under_gqa() {
    // 4 heads, 2 kv heads: k is split by 4 / 2 = 2
    let hp = llama_hparams(4, 2, 8);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
    let raw = f32_raw("k", &[8, 1], &values);
    let record = transformer.transform("blk.0.attn_k.weight".into(), raw).unwrap();
    let expected = reverse_head_permute(values, &[8], 2).unwrap();
    assert_eq!(as_f32(&record), expected);
}

#[test]
fn test_transform_k_uses_head_count_without_gqa() {
    let hp = llama_hparams(2, 2, 8);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
    let raw = f32_raw("k", &[8, 1], &values);
    let record = transformer.transform("blk.0.attn_k.weight".into(), raw).unwrap();
    let expected = reverse_head_permute(values, &[8], 2).unwrap();
    assert_eq!(as_f32(&record), expected);
}

#[test]
fn test_transform_leaves_v_untouched() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let raw = f32_raw("v", &[4, 2], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let record = transformer.transform("blk.0.attn_v.weight".into(), raw).unwrap();
    assert_eq!(as_f32(&record), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
}

#[test]
fn test_transform_q_shape_mismatch_names_tensor() {
    let hp = llama_hparams(2, 2, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let raw = f32_raw("model.layers.0.self_attn.q_proj.weight", &[6, 2], &[0.0; 12]);
    let err = transformer.transform("blk.0.attn_q.weight".into(), raw).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::ShapeMismatch { ref name, .. } if name == "model.layers.0.self_attn.q_proj.weight"
    ));
}

#[test]
fn test_transform_transposes_gpt2_projections() {
    let transformer = LayoutTransformer::new(&GPT2, &gpt2_hparams(), OutputPrecision::Wide);
    let raw = f32_raw("h.0.mlp.c_fc.weight", &[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let record = transformer.transform("blk.0.ffn_up.weight".into(), raw).unwrap();
    assert_eq!(record.shape, vec![3, 2]);
    assert_eq!(as_f32(&record), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
}

#[test]
fn test_transform_keeps_gpt2_bias_and_embeddings() {
    let transformer = LayoutTransformer::new(&GPT2, &gpt2_hparams(), OutputPrecision::Narrow);
    let raw = f32_raw("wpe.weight", &[2, 2], &[0.5, 1.5, 2.5, 3.5]);
    let record = transformer.transform("position_embd.weight".into(), raw).unwrap();
    assert_eq!(record.shape, vec![2, 2]);
    assert_eq!(as_f32(&record), vec![0.5, 1.5, 2.5, 3.5]);
}

#[test]
fn test_transform_narrows_matrices() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Narrow);
    let raw = f32_raw("up", &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let record = transformer.transform("blk.0.ffn_up.weight".into(), raw).unwrap();
    assert_eq!(record.dtype, TensorDtype::F16);
    assert_eq!(record.data.len(), 8);
    let first = f16::from_le_bytes([record.data[0], record.data[1]]);
    assert_eq!(first.to_f32(), 1.0);
}

#[test]
fn test_transform_upcasts_bf16() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let data: Vec<u8> = [1.0f32, -2.0]
        .iter()
        .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
        .collect();
    let raw = RawTensor {
        name: "model.norm.weight".into(),
        dtype: SourceDtype::BF16,
        shape: vec![2],
        data,
    };
    let record = transformer.transform("output_norm.weight".into(), raw).unwrap();
    assert_eq!(as_f32(&record), vec![1.0, -2.0]);
}

#[test]
fn test_transform_widens_f16_vectors() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Narrow);
    let data: Vec<u8> = [0.25f32, 4.0]
        .iter()
        .flat_map(|&v| f16::from_f32(v).to_le_bytes())
        .collect();
    let raw = RawTensor {
        name: "model.norm.weight".into(),
        dtype: SourceDtype::F16,
        shape: vec![2],
        data,
    };
    let record = transformer.transform("output_norm.weight".into(), raw).unwrap();
    assert_eq!(as_f32(&record), vec![0.25, 4.0]);
}

#[test]
fn test_transform_rejects_unknown_dtype() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let raw = RawTensor {
        name: "model.norm.weight".into(),
        dtype: SourceDtype::Other("F8_E4M3".into()),
        shape: vec![2],
        data: vec![0, 0],
    };
    let err = transformer.transform("output_norm.weight".into(), raw).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::UnsupportedDtype { ref dtype, .. } if dtype == "F8_E4M3"
    ));
}

#[test]
fn test_transform_rejects_short_data() {
    let hp = llama_hparams(1, 1, 4);
    let transformer = LayoutTransformer::new(&LLAMA, &hp, OutputPrecision::Wide);
    let mut raw = f32_raw("model.norm.weight", &[4], &[1.0, 2.0, 3.0, 4.0]);
    raw.data.truncate(12);
    assert!(matches!(
        transformer.transform("output_norm.weight".into(), raw),
        Err(ConvertError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_dtype_codes() {
    assert_eq!(TensorDtype::F32.ggml_type(), 0);
    assert_eq!(TensorDtype::F16.ggml_type(), 1);
    assert_eq!(TensorDtype::from_ggml_type(1), Some(TensorDtype::F16));
    assert_eq!(TensorDtype::from_ggml_type(2), None);
    assert_eq!(OutputPrecision::Narrow.file_type(), 1);
}
