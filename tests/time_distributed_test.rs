use ndarray::{Array3, Array4};
use rust_layer_wrappers::{
    activations::Activation,
    layer_from_config, no_mask,
    regularizers::Regularizer,
    BackendConfig, Dropout, DropoutConfig, ExecutionStrategy, Layer, LayerConfig, LayerError,
    Linear, LinearConfig, Nested, RecurrentConfig, Shape, Tensor, TimeDistributed, LSTM,
};

fn dense(units: usize) -> Linear {
    Linear::new(
        LinearConfig::new(units)
            .with_name("dense")
            .with_activation(Activation::Tanh),
    )
}

fn sequence(batch: usize, time: usize, features: usize) -> Tensor {
    Array3::from_shape_fn((batch, time, features), |(b, t, f)| {
        ((b * 31 + t * 7 + f) as f64 * 0.37).sin()
    })
    .into_dyn()
}

fn assert_close(a: &Tensor, b: &Tensor) {
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-10, "{} != {}", x, y);
    }
}

#[test]
fn test_output_shape_example() {
    let mut td = TimeDistributed::new(Box::new(Linear::new(LinearConfig::new(8))));
    let input_shape: Nested<Shape> = Shape::with_dynamic_batch(&[10, 16]).into();

    assert_eq!(
        td.output_shape_for(&input_shape).unwrap(),
        Nested::One(Shape::with_dynamic_batch(&[10, 8]))
    );

    td.build(&input_shape).unwrap();
    assert_eq!(td.output_shape().unwrap(), Nested::One(Shape::with_dynamic_batch(&[10, 8])));
    assert_eq!(td.class_name(), "TimeDistributed");
}

#[test]
fn test_batch_and_time_axes_preserved() {
    let shapes = vec![
        Shape::with_dynamic_batch(&[3, 5]),
        Shape::fixed(&[4, 9, 2]),
        Shape::new(vec![Some(6), None, Some(7)]),
        Shape::with_dynamic_batch(&[2, 3, 4]),
    ];
    for shape in shapes {
        let td = TimeDistributed::new(Box::new(Linear::new(LinearConfig::new(11))));
        let output = td.output_shape_for(&shape.clone().into()).unwrap().into_single().unwrap();
        assert_eq!(output.dim(0), shape.dim(0));
        assert_eq!(output.dim(1), shape.dim(1));
        assert_eq!(output.last(), Some(11));
    }
}

#[test]
fn test_rank_two_input_fails() {
    let mut td = TimeDistributed::new(Box::new(dense(2)));
    let err = td.build(&Shape::with_dynamic_batch(&[5]).into()).unwrap_err();
    assert!(matches!(err, LayerError::ShapeMismatch(_)));

    let err = td.output_shape_for(&Shape::with_dynamic_batch(&[5]).into()).unwrap_err();
    assert!(matches!(err, LayerError::ShapeMismatch(_)));
}

#[test]
fn test_step_wise_and_reshape_paths_agree() {
    let shape: Nested<Shape> = Shape::with_dynamic_batch(&[5, 3]).into();
    let mut step_wise = TimeDistributed::new(Box::new(dense(4)))
        .with_backend(BackendConfig::new().with_strategy(ExecutionStrategy::StepWise));
    let mut reshaped = TimeDistributed::new(Box::new(dense(4)))
        .with_backend(BackendConfig::new().with_strategy(ExecutionStrategy::Reshape));
    step_wise.build(&shape).unwrap();
    reshaped.build(&shape).unwrap();
    reshaped.set_weights(&step_wise.get_weights()).unwrap();

    let x: Nested<Tensor> = sequence(2, 5, 3).into();
    let a = step_wise.call(&x, &no_mask()).unwrap().into_single().unwrap();
    let b = reshaped.call(&x, &no_mask()).unwrap().into_single().unwrap();
    assert_eq!(a.shape(), &[2, 5, 4]);
    assert_close(&a, &b);
}

#[test]
fn test_auto_path_for_fixed_and_dynamic_batch() {
    let mut fixed = TimeDistributed::new(Box::new(dense(3)));
    fixed.build(&Shape::fixed(&[2, 4, 3]).into()).unwrap();
    let mut dynamic = TimeDistributed::new(Box::new(dense(3)));
    dynamic.build(&Shape::with_dynamic_batch(&[4, 3]).into()).unwrap();
    dynamic.set_weights(&fixed.get_weights()).unwrap();

    let x: Nested<Tensor> = sequence(2, 4, 3).into();
    let a = fixed.call(&x, &no_mask()).unwrap().into_single().unwrap();
    let b = dynamic.call(&x, &no_mask()).unwrap().into_single().unwrap();
    assert_close(&a, &b);
}

#[test]
fn test_each_step_matches_inner_layer() {
    let mut td = TimeDistributed::new(Box::new(dense(2)));
    td.build(&Shape::with_dynamic_batch(&[3, 4]).into()).unwrap();
    let mut inner = dense(2);
    inner.build(&Shape::with_dynamic_batch(&[4]).into()).unwrap();
    inner.set_weights(&td.get_weights()).unwrap();

    let x = sequence(2, 3, 4);
    let y = td.call(&x.clone().into(), &no_mask()).unwrap().into_single().unwrap();
    for t in 0..3 {
        let step = rust_layer_wrappers::backend::time_slice(&x, t);
        let expected = inner.call(&step.into(), &no_mask()).unwrap().into_single().unwrap();
        assert_close(&rust_layer_wrappers::backend::time_slice(&y, t), &expected);
    }
}

#[test]
fn test_recurrent_inner_layer_over_rank_four_input() {
    let lstm = || LSTM::new(RecurrentConfig::new(5).with_name("lstm"));
    let shape: Nested<Shape> = Shape::with_dynamic_batch(&[6, 4, 3]).into();

    let mut reshaped = TimeDistributed::new(Box::new(lstm()));
    reshaped.build(&shape).unwrap();
    assert_eq!(reshaped.output_shape().unwrap(), Nested::One(Shape::with_dynamic_batch(&[6, 5])));

    let mut step_wise = TimeDistributed::new(Box::new(lstm()))
        .with_backend(BackendConfig::new().with_strategy(ExecutionStrategy::StepWise));
    step_wise.build(&shape).unwrap();
    step_wise.set_weights(&reshaped.get_weights()).unwrap();

    let x: Nested<Tensor> = Array4::from_shape_fn((2, 6, 4, 3), |(b, t, s, f)| {
        ((b + 2 * t + 3 * s + 5 * f) as f64 * 0.11).cos()
    })
    .into_dyn()
    .into();
    let a = reshaped.call(&x, &no_mask()).unwrap().into_single().unwrap();
    let b = step_wise.call(&x, &no_mask()).unwrap().into_single().unwrap();
    assert_eq!(a.shape(), &[2, 6, 5]);
    assert_close(&a, &b);
}

#[test]
fn test_input_spec_is_enforced() {
    let mut td = TimeDistributed::new(Box::new(dense(2)));
    td.build(&Shape::with_dynamic_batch(&[4, 3]).into()).unwrap();
    assert_eq!(td.input_specs().len(), 1);

    let wrong_time: Nested<Tensor> = sequence(2, 5, 3).into();
    assert!(matches!(td.call(&wrong_time, &no_mask()), Err(LayerError::ShapeMismatch(_))));

    let two_inputs = Nested::Many(vec![sequence(2, 4, 3), sequence(2, 4, 3)]);
    assert!(matches!(td.call(&two_inputs, &no_mask()), Err(LayerError::ShapeMismatch(_))));
}

#[test]
fn test_activity_regularizer_registers_loss() {
    let inner = Linear::new(
        LinearConfig::new(2)
            .with_name("dense")
            .with_activity_regularizer(Regularizer::L2(0.5)),
    );
    let mut td = TimeDistributed::new(Box::new(inner)).with_name("td");
    td.build(&Shape::with_dynamic_batch(&[3, 4]).into()).unwrap();
    assert!(td.losses().is_empty());

    let y = td
        .call(&sequence(2, 3, 4).into(), &no_mask())
        .unwrap()
        .into_single()
        .unwrap();
    let losses = td.losses();
    assert_eq!(losses.len(), 1);
    assert_eq!(losses[0].source, "td/activity_regularizer");
    assert_eq!(losses[0].input_dims, vec![vec![2, 3, 4]]);
    assert!((losses[0].value - Regularizer::L2(0.5).loss(&y)).abs() < 1e-12);
}

#[test]
fn test_weight_views_delegate_to_inner_layer() {
    let mut td = TimeDistributed::new(Box::new(dense(2)));
    td.build(&Shape::with_dynamic_batch(&[3, 4]).into()).unwrap();

    let names: Vec<&str> = td.trainable_weights().iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["dense/kernel", "dense/bias"]);
    assert!(td.non_trainable_weights().is_empty());

    let weights = td.get_weights();
    let err = td.set_weights(&weights[..1]).unwrap_err();
    assert!(matches!(err, LayerError::ShapeMismatch(_)));

    let frozen = td.with_trainable(false);
    assert!(frozen.trainable_weights().is_empty());
    assert_eq!(frozen.non_trainable_weights().len(), 2);
}

#[test]
fn test_learning_phase_inherited_from_inner_layer() {
    let dropout = Dropout::new(DropoutConfig::new(0.5).with_seed(3)).unwrap();
    let mut td = TimeDistributed::new(Box::new(dropout));
    assert!(td.uses_learning_phase());

    td.build(&Shape::with_dynamic_batch(&[3, 4]).into()).unwrap();
    td.eval();
    let x = sequence(2, 3, 4);
    let y = td.call(&x.clone().into(), &no_mask()).unwrap().into_single().unwrap();
    assert_eq!(y, x);

    assert!(!TimeDistributed::new(Box::new(dense(2))).uses_learning_phase());
}

#[test]
fn test_config_round_trip() {
    let td = TimeDistributed::new(Box::new(dense(7))).with_name("td_dense");
    let config = td.get_config();

    let json = config.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["class_name"], "TimeDistributed");
    assert_eq!(value["config"]["name"], "td_dense");
    assert_eq!(value["config"]["layer"]["class_name"], "Linear");
    assert_eq!(value["config"]["layer"]["config"]["units"], 7);

    let restored = layer_from_config(&LayerConfig::from_json(&json).unwrap()).unwrap();
    assert_eq!(restored.get_config(), config);
    assert_eq!(restored.name(), "td_dense");
}
