use ndarray::Array3;
use rust_layer_wrappers::{
    no_mask,
    persistence::{LayerMetadata, LayerPersistence, PersistentLayer},
    Bidirectional, Layer, LayerConfig, LayerError, Linear, LinearConfig, MergeMode, Nested,
    RecurrentConfig, Shape, Tensor, TimeDistributed, LSTM,
};
use tempfile::tempdir;

fn sequence(batch: usize, time: usize, features: usize) -> Tensor {
    Array3::from_shape_fn((batch, time, features), |(b, t, f)| {
        ((b * 17 + t * 3 + f) as f64 * 0.29).cos()
    })
    .into_dyn()
}

// JSON float parsing may differ from the saved value in the last bit
fn assert_close(a: &Tensor, b: &Tensor) {
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-10, "{} != {}", x, y);
    }
}

fn bidirectional() -> (Bidirectional, Nested<Shape>) {
    let template = LSTM::new(
        RecurrentConfig::new(4)
            .with_name("lstm")
            .with_return_sequences(true),
    );
    let mut bi = Bidirectional::new(&template, Some(MergeMode::Concat)).unwrap();
    let shape: Nested<Shape> = Shape::with_dynamic_batch(&[6, 3]).into();
    bi.build(&shape).unwrap();
    (bi, shape)
}

#[test]
fn test_layer_metadata_creation() {
    let metadata = LayerMetadata {
        layer_name: "bidirectional_lstm".to_string(),
        class_name: "Bidirectional".to_string(),
        version: "0.1.0".to_string(),
        created_at: "2024-01-01T00:00:00Z".to_string(),
        num_weights: 8,
        description: Some("Test layer for validation".to_string()),
    };

    assert_eq!(metadata.layer_name, "bidirectional_lstm");
    assert_eq!(metadata.num_weights, 8);
    assert_eq!(metadata.description.as_deref(), Some("Test layer for validation"));
}

#[test]
fn test_bidirectional_save_load_json() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("bidirectional.json");

    let (mut bi, shape) = bidirectional();
    let x: Nested<Tensor> = sequence(2, 6, 3).into();
    let output_before = bi.call(&x, &no_mask()).unwrap().into_single().unwrap();

    bi.save(&file_path, &shape, Some("Test JSON persistence".to_string()))
        .unwrap();
    assert!(file_path.exists());

    let (mut loaded, metadata) = LayerPersistence::load(&file_path).unwrap();
    assert_eq!(metadata.class_name, "Bidirectional");
    assert_eq!(metadata.layer_name, "bidirectional_lstm");
    assert_eq!(metadata.num_weights, 8);
    assert!(loaded.built());
    assert_eq!(loaded.get_config(), bi.get_config());

    let output_after = loaded.call(&x, &no_mask()).unwrap().into_single().unwrap();
    assert_close(&output_before, &output_after);
}

#[test]
fn test_time_distributed_save_load_json() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("time_distributed.json");

    let mut td = TimeDistributed::new(Box::new(Linear::new(LinearConfig::new(5).with_name("dense"))));
    let shape: Nested<Shape> = Shape::with_dynamic_batch(&[4, 2]).into();
    td.build(&shape).unwrap();
    td.save(&file_path, &shape, None).unwrap();

    let saved = LayerPersistence::load_from_json(&file_path).unwrap();
    assert!(matches!(saved.config, LayerConfig::TimeDistributed(_)));
    assert_eq!(saved.input_shape, Some(vec![Shape::with_dynamic_batch(&[4, 2])]));
    assert_eq!(saved.weights.len(), 2);

    let mut loaded = LayerPersistence::build_from_saved(&saved).unwrap();
    let x: Nested<Tensor> = sequence(3, 4, 2).into();
    let expected = td.call(&x, &no_mask()).unwrap().into_single().unwrap();
    let actual = loaded.call(&x, &no_mask()).unwrap().into_single().unwrap();
    assert_close(&actual, &expected);
}

#[test]
fn test_weights_save_load_binary() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("weights.bin");

    let (bi, _) = bidirectional();
    bi.save_weights(&file_path).unwrap();
    assert!(file_path.exists());

    let (mut other, _) = bidirectional();
    assert_ne!(other.get_weights(), bi.get_weights());
    other.load_weights(&file_path).unwrap();
    assert_eq!(other.get_weights(), bi.get_weights());
}

#[test]
fn test_weight_snapshot_count_mismatch() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("weights.bin");

    let (bi, _) = bidirectional();
    LayerPersistence::save_weights_binary(&bi.get_weights()[..4], &file_path).unwrap();

    let (mut other, _) = bidirectional();
    let err = other.load_weights(&file_path).unwrap_err();
    assert!(matches!(err, LayerError::ShapeMismatch(_)));
}

#[test]
fn test_full_layer_requires_json() {
    let dir = tempdir().unwrap();
    let (bi, shape) = bidirectional();

    let err = bi.save(dir.path().join("layer.bin"), &shape, None).unwrap_err();
    assert!(matches!(err, LayerError::Configuration(_)));
    assert!(LayerPersistence::load(dir.path().join("layer.model")).is_err());
}

#[test]
fn test_save_before_build() {
    let dir = tempdir().unwrap();
    let template = LSTM::new(RecurrentConfig::new(2));
    let bi = Bidirectional::new(&template, None).unwrap();
    let shape: Nested<Shape> = Shape::with_dynamic_batch(&[3, 2]).into();

    let err = bi.save(dir.path().join("layer.json"), &shape, None).unwrap_err();
    assert!(matches!(err, LayerError::NotBuilt(_)));
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let err = LayerPersistence::load(dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, LayerError::Io(_)));
}
