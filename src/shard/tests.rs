//! Tests for shard discovery and iteration

use super::*;
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::fs;
use std::io::Write;

/// Serialize f32 tensors into a shard file
fn write_shard(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) {
    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| bytemuck::cast_slice::<f32, u8>(values).to_vec())
        .collect();
    let views: Vec<(&str, TensorView<'_>)> = tensors
        .iter()
        .zip(&bytes)
        .map(|((name, shape, _), data)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), data).expect("valid view");
            (*name, view)
        })
        .collect();
    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "pt".to_string());
    let serialized = safetensors::serialize(views, &Some(metadata)).expect("serialize should succeed");
    fs::write(path, serialized).expect("write should succeed");
}

fn pickle_unicode(out: &mut Vec<u8>, text: &str) {
    out.push(b'X');
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn pickle_int_tuple(out: &mut Vec<u8>, values: &[usize]) {
    out.push(b'(');
    for value in values {
        out.push(b'J');
        out.extend_from_slice(&(*value as i32).to_le_bytes());
    }
    out.push(b't');
}

/// Write f32 tensors as a `torch.save` zip archive: a protocol 2 pickle of
/// `{name: _rebuild_tensor_v2(storage, 0, size, stride, False, {})}` plus one
/// raw storage entry per tensor
fn write_torch_checkpoint(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) {
    let mut pickle = vec![0x80, 0x02, b'}', b'('];
    for (key, (name, shape, values)) in tensors.iter().enumerate() {
        let mut stride = vec![1usize; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            stride[axis] = stride[axis + 1] * shape[axis + 1];
        }
        pickle_unicode(&mut pickle, name);
        pickle.extend_from_slice(b"ctorch._utils\n_rebuild_tensor_v2\n(");
        pickle.push(b'(');
        pickle_unicode(&mut pickle, "storage");
        pickle.extend_from_slice(b"ctorch\nFloatStorage\n");
        pickle_unicode(&mut pickle, &key.to_string());
        pickle_unicode(&mut pickle, "cpu");
        pickle.push(b'J');
        pickle.extend_from_slice(&(values.len() as i32).to_le_bytes());
        pickle.extend_from_slice(b"tQ");
        pickle.push(b'J');
        pickle.extend_from_slice(&0i32.to_le_bytes());
        pickle_int_tuple(&mut pickle, shape);
        pickle_int_tuple(&mut pickle, &stride);
        pickle.extend_from_slice(&[0x89, b'}', b't', b'R']);
    }
    pickle.extend_from_slice(b"u.");

    let mut archive = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    archive.start_file("archive/data.pkl", options).unwrap();
    archive.write_all(&pickle).unwrap();
    for (key, (_, _, values)) in tensors.iter().enumerate() {
        archive.start_file(format!("archive/data/{key}"), options).unwrap();
        archive.write_all(bytemuck::cast_slice::<f32, u8>(values)).unwrap();
    }
    archive.finish().unwrap();
}

#[test]
fn test_parse_shard_name() {
    assert_eq!(parse_shard_name("model-00001-of-00002.safetensors"), Some((1, 2)));
    assert_eq!(parse_shard_name("model-00002-of-00002.safetensors"), Some((2, 2)));
    assert_eq!(parse_shard_name("model-00003-of-00002.safetensors"), None);
    assert_eq!(parse_shard_name("model-00000-of-00002.safetensors"), None);
    assert_eq!(parse_shard_name("model.safetensors"), None);
    assert_eq!(parse_shard_name("model-00001-of-00002.bin"), None);
}

#[test]
fn test_discover_single_file() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(&dir.path().join(SINGLE_FILE), &[("a", vec![1], vec![1.0])]);
    let shards = discover(dir.path()).unwrap();
    assert_eq!(shards, vec![dir.path().join(SINGLE_FILE)]);
}

#[test]
fn test_discover_orders_numbered_shards() {
    let dir = tempfile::tempdir().unwrap();
    for i in [3, 1, 2] {
        let name = format!("model-0000{i}-of-00003.safetensors");
        write_shard(&dir.path().join(&name), &[("a", vec![1], vec![1.0])]);
    }
    let shards = discover(dir.path()).unwrap();
    let names: Vec<String> = shards
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "model-00001-of-00003.safetensors",
            "model-00002-of-00003.safetensors",
            "model-00003-of-00003.safetensors",
        ]
    );
}

#[test]
fn test_discover_missing_shard() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(&dir.path().join("model-00001-of-00003.safetensors"), &[("a", vec![1], vec![1.0])]);
    write_shard(&dir.path().join("model-00003-of-00003.safetensors"), &[("b", vec![1], vec![1.0])]);
    let err = discover(dir.path()).unwrap_err();
    assert!(matches!(err, ConvertError::MissingShard { index: 2, total: 3 }));
}

#[test]
fn test_discover_refuses_pickle() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model.bin"), b"\x80\x02").unwrap();
    let err = discover(dir.path()).unwrap_err();
    assert!(err.is_security_risk());
    assert!(matches!(err, ConvertError::PickleCheckpoint { .. }));
}

#[test]
fn test_discover_prefers_safetensors_over_pickle() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model.bin"), b"\x80\x02").unwrap();
    write_shard(&dir.path().join(SINGLE_FILE), &[("a", vec![1], vec![1.0])]);
    assert!(discover(dir.path()).is_ok());
}

#[test]
fn test_discover_refuses_numbered_pickle() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model-00001-of-00002.bin"), b"\x80\x02").unwrap();
    fs::write(dir.path().join("pytorch_model-00002-of-00002.bin"), b"\x80\x02").unwrap();
    let err = discover(dir.path()).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::PickleCheckpoint { ref file } if file.ends_with("pytorch_model-00001-of-00002.bin")
    ));
}

#[test]
fn test_discover_accepts_pickle_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model.bin"), b"\x80\x02").unwrap();
    let shards = discover_with(dir.path(), true).unwrap();
    assert_eq!(shards, vec![dir.path().join(PICKLE_SINGLE_FILE)]);
    assert_eq!(CheckpointFormat::from_path(&shards[0]), CheckpointFormat::Pickle);
    assert!(!CheckpointFormat::Pickle.is_safe());
}

#[test]
fn test_discover_orders_pickle_shards_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    for i in [2, 1] {
        fs::write(dir.path().join(format!("pytorch_model-0000{i}-of-00002.bin")), b"").unwrap();
    }
    let shards = discover_with(dir.path(), true).unwrap();
    assert_eq!(
        shards,
        vec![
            dir.path().join("pytorch_model-00001-of-00002.bin"),
            dir.path().join("pytorch_model-00002-of-00002.bin"),
        ]
    );
}

#[test]
fn test_discover_missing_pickle_shard_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model-00002-of-00002.bin"), b"").unwrap();
    assert!(matches!(
        discover_with(dir.path(), true),
        Err(ConvertError::MissingShard { index: 1, total: 2 })
    ));
}

#[test]
fn test_allow_pickle_still_prefers_safetensors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pytorch_model.bin"), b"\x80\x02").unwrap();
    write_shard(&dir.path().join(SINGLE_FILE), &[("a", vec![1], vec![1.0])]);
    assert_eq!(
        discover_with(dir.path(), true).unwrap(),
        vec![dir.path().join(SINGLE_FILE)]
    );
}

#[test]
fn test_discover_nothing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("config.json"), b"{}").unwrap();
    assert!(matches!(
        discover(dir.path()),
        Err(ConvertError::NoCheckpoint { .. })
    ));
}

#[test]
fn test_iterates_across_shards_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(
        &dir.path().join("model-00001-of-00002.safetensors"),
        &[
            ("first", vec![2], vec![1.0, 2.0]),
            ("second", vec![1, 2], vec![3.0, 4.0]),
        ],
    );
    write_shard(
        &dir.path().join("model-00002-of-00002.safetensors"),
        &[("third", vec![3], vec![5.0, 6.0, 7.0])],
    );

    let iter = ShardIterator::open(dir.path()).unwrap();
    assert_eq!(iter.shard_count(), 2);
    let tensors: Vec<RawTensor> = iter.collect::<Result<_>>().unwrap();
    assert_eq!(tensors.len(), 3);

    // within a shard, order follows data offsets
    let first_shard: Vec<&str> = tensors[..2].iter().map(|t| t.name.as_str()).collect();
    assert!(first_shard.contains(&"first") && first_shard.contains(&"second"));
    assert_eq!(tensors[2].name, "third");
    assert_eq!(tensors[2].shape, vec![3]);
    assert_eq!(tensors[2].dtype, SourceDtype::F32);
    assert_eq!(
        tensors[2].data,
        [5.0f32, 6.0, 7.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>()
    );

    let second = tensors.iter().find(|t| t.name == "second").unwrap();
    assert_eq!(second.shape, vec![1, 2]);
}

#[test]
fn test_iteration_order_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let tensors: Vec<(&str, Vec<usize>, Vec<f32>)> = (0..6)
        .map(|i| (["a", "b", "c", "d", "e", "f"][i], vec![1], vec![i as f32]))
        .collect();
    write_shard(&dir.path().join(SINGLE_FILE), &tensors);

    let first: Vec<String> = ShardIterator::open(dir.path())
        .unwrap()
        .map(|t| t.unwrap().name)
        .collect();
    let second: Vec<String> = ShardIterator::open(dir.path())
        .unwrap()
        .map(|t| t.unwrap().name)
        .collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
}

#[test]
fn test_corrupt_shard_is_parse_error_and_fuses() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("model-00001-of-00002.safetensors");
    fs::write(&bad, b"not a safetensors file").unwrap();
    write_shard(
        &dir.path().join("model-00002-of-00002.safetensors"),
        &[("a", vec![1], vec![1.0])],
    );

    let mut iter = ShardIterator::open(dir.path()).unwrap();
    assert!(matches!(
        iter.next(),
        Some(Err(ConvertError::SafeTensorsParse { ref file, .. })) if *file == bad
    ));
    assert!(iter.next().is_none());
}

#[test]
fn test_pickle_checkpoint_yields_tensors_by_name() {
    let dir = tempfile::tempdir().unwrap();
    write_torch_checkpoint(
        &dir.path().join(PICKLE_SINGLE_FILE),
        &[
            ("wte.weight", vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            ("ln_f.bias", vec![3], vec![-1.0, 0.5, 2.0]),
        ],
    );

    assert!(ShardIterator::open(dir.path()).is_err());
    let iter = ShardIterator::open_with(dir.path(), true).unwrap();
    assert_eq!(iter.shard_count(), 1);
    let tensors: Vec<RawTensor> = iter.collect::<Result<_>>().unwrap();

    let names: Vec<&str> = tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["ln_f.bias", "wte.weight"]);
    assert_eq!(tensors[1].dtype, SourceDtype::F32);
    assert_eq!(tensors[1].shape, vec![2, 3]);
    assert_eq!(
        tensors[1].data,
        bytemuck::cast_slice::<f32, u8>(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).to_vec()
    );
    assert_eq!(
        tensors[0].data,
        bytemuck::cast_slice::<f32, u8>(&[-1.0, 0.5, 2.0]).to_vec()
    );
}

#[test]
fn test_corrupt_pickle_is_parse_error_and_fuses() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("pytorch_model-00001-of-00002.bin");
    fs::write(&bad, b"\x80\x02 not a zip archive").unwrap();
    write_torch_checkpoint(
        &dir.path().join("pytorch_model-00002-of-00002.bin"),
        &[("a", vec![1], vec![1.0])],
    );

    let mut iter = ShardIterator::open_with(dir.path(), true).unwrap();
    assert!(matches!(
        iter.next(),
        Some(Err(ConvertError::PickleParse { ref file, .. })) if *file == bad
    ));
    assert!(iter.next().is_none());
}
