//! Recurrent layers over `(batch, time, features)` inputs.
//!
//! [`RecurrentLayer`] owns the sequence loop, state handling and masking; a
//! [`Cell`] supplies the per-step equations and the weight layout.

use std::fmt;
use std::marker::PhantomData;

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayD, Ix1, Ix2, IxDyn};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use serde::{Serialize, Deserialize};

use crate::backend::{self, Mask, Tensor};
use crate::error::{LayerError, Result};
use crate::layers::{assign_weights, single_input, Layer, LayerConfig, Recurrent, StateUpdate, Weight};
use crate::shape::{InputSpec, Nested, Shape};

fn default_true() -> bool {
    true
}

/// Configuration shared by all recurrent layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecurrentConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub trainable: bool,
    pub units: usize,
    /// Emit the whole output sequence instead of the last step only.
    #[serde(default)]
    pub return_sequences: bool,
    /// Visit the sequence from last step to first.
    #[serde(default)]
    pub go_backwards: bool,
    /// Carry the final states of one call into the next.
    #[serde(default)]
    pub stateful: bool,
}

impl RecurrentConfig {
    pub fn new(units: usize) -> Self {
        RecurrentConfig {
            name: "rnn".to_string(),
            trainable: true,
            units,
            return_sequences: false,
            go_backwards: false,
            stateful: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_return_sequences(mut self, return_sequences: bool) -> Self {
        self.return_sequences = return_sequences;
        self
    }

    pub fn with_go_backwards(mut self, go_backwards: bool) -> Self {
        self.go_backwards = go_backwards;
        self
    }

    pub fn with_stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    /// A copy iterating in the opposite direction.
    pub fn reversed(&self) -> Self {
        let mut config = self.clone();
        config.go_backwards = !self.go_backwards;
        config
    }
}

/// Per-step equations of a recurrent layer.
pub trait Cell: Clone + fmt::Debug {
    const CLASS_NAME: &'static str;

    /// Gate blocks stacked in the input and recurrent matrices.
    const GATES: usize;

    /// Names of the states threaded through time, hidden state first.
    const STATE_NAMES: &'static [&'static str];

    /// `x_t (batch, input_dim)` and states `(batch, units)` to `(h_t, states')`.
    fn step(
        weights: &[Weight],
        units: usize,
        x: ArrayView2<f64>,
        states: &[Array2<f64>],
    ) -> Result<(Array2<f64>, Vec<Array2<f64>>)>;

    fn wrap_config(config: RecurrentConfig) -> LayerConfig;
}

pub(crate) fn matrix(weight: &Weight) -> Result<ArrayView2<'_, f64>> {
    Ok(weight.value.view().into_dimensionality::<Ix2>()?)
}

pub(crate) fn vector(weight: &Weight) -> Result<ArrayView1<'_, f64>> {
    Ok(weight.value.view().into_dimensionality::<Ix1>()?)
}

/// Local names of a recurrent layer's weights, in `get_weights` order.
pub const WEIGHT_NAMES: [&str; 4] = ["w_ih", "w_hh", "b_ih", "b_hh"];

/// A recurrent layer driven by the backend `rnn` primitive.
///
/// Weights are `w_ih (gates*units, input_dim)`, `w_hh (gates*units, units)`,
/// `b_ih (gates*units,)` and `b_hh (gates*units,)`.
#[derive(Clone, Debug)]
pub struct RecurrentLayer<C: Cell> {
    config: RecurrentConfig,
    weights: Vec<Weight>,
    initial_weights: Option<Vec<Tensor>>,
    input_spec: Option<InputSpec>,
    states: Vec<Tensor>,
    updates: Vec<StateUpdate>,
    built: bool,
    cell: PhantomData<C>,
}

impl<C: Cell> RecurrentLayer<C> {
    pub fn new(config: RecurrentConfig) -> Self {
        RecurrentLayer {
            config,
            weights: Vec::new(),
            initial_weights: None,
            input_spec: None,
            states: Vec::new(),
            updates: Vec::new(),
            built: false,
            cell: PhantomData,
        }
    }

    pub fn units(&self) -> usize {
        self.config.units
    }

    pub fn input_spec(&self) -> Option<&InputSpec> {
        self.input_spec.as_ref()
    }

    /// Current states of a stateful layer, hidden state first.
    pub fn states(&self) -> &[Tensor] {
        &self.states
    }

    fn zero_states(&self, batch: usize) -> Vec<Tensor> {
        C::STATE_NAMES
            .iter()
            .map(|_| ArrayD::zeros(IxDyn(&[batch, self.config.units])))
            .collect()
    }
}

impl<C: Cell> Layer for RecurrentLayer<C> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn set_name(&mut self, name: String) {
        self.config.name = name;
    }

    fn class_name(&self) -> &'static str {
        C::CLASS_NAME
    }

    fn built(&self) -> bool {
        self.built
    }

    fn build(&mut self, input_shape: &Nested<Shape>) -> Result<()> {
        let shape = input_shape.expect_single(&self.config.name)?;
        if shape.rank() != 3 {
            return Err(LayerError::shape(format!(
                "recurrent layer `{}` expects (batch, time, features) inputs, got {}",
                self.config.name, shape
            )));
        }
        let input_dim = shape.last().ok_or_else(|| {
            LayerError::shape(format!(
                "the feature axis of the input to `{}` must be known, got {}",
                self.config.name, shape
            ))
        })?;

        let units = self.config.units;
        let rows = C::GATES * units;
        let dist = Uniform::new(-0.1, 0.1);
        let name = self.config.name.clone();
        self.weights = vec![
            Weight::new(&name, WEIGHT_NAMES[0], Array2::random((rows, input_dim), dist).into_dyn()),
            Weight::new(&name, WEIGHT_NAMES[1], Array2::random((rows, units), dist).into_dyn()),
            Weight::new(&name, WEIGHT_NAMES[2], ArrayD::zeros(IxDyn(&[rows]))),
            Weight::new(&name, WEIGHT_NAMES[3], ArrayD::zeros(IxDyn(&[rows]))),
        ];

        if self.config.stateful {
            let batch = shape.batch().ok_or_else(|| {
                LayerError::config(format!(
                    "stateful layer `{}` needs a fixed batch size; declare the full batch input shape",
                    self.config.name
                ))
            })?;
            self.states = self.zero_states(batch);
        }

        self.input_spec = Some(InputSpec::new(shape.clone()));
        self.built = true;

        if let Some(initial) = self.initial_weights.take() {
            self.set_weights(&initial)?;
        }
        Ok(())
    }

    fn call(&mut self, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Tensor>> {
        if !self.built {
            return Err(LayerError::NotBuilt(self.config.name.clone()));
        }
        let x = single_input(&self.config.name, inputs)?;
        if let Some(spec) = &self.input_spec {
            spec.check(&self.config.name, 0, x.shape())?;
        }
        let batch = x.shape()[0];
        let mask = mask.single().and_then(|m| m.as_ref());

        let initial_states = if self.config.stateful {
            if self.states.iter().any(|s| s.shape()[0] != batch) {
                return Err(LayerError::shape(format!(
                    "stateful layer `{}` was built for a different batch size than {}",
                    self.config.name, batch
                )));
            }
            self.states.clone()
        } else {
            self.zero_states(batch)
        };

        let weights = &self.weights;
        let units = self.config.units;
        let step = |xs: &[Tensor], states: &[Tensor]| -> Result<(Tensor, Vec<Tensor>)> {
            let x_t = xs[0].view().into_dimensionality::<Ix2>()?;
            let states = states
                .iter()
                .map(|s| -> Result<Array2<f64>> { Ok(s.view().into_dimensionality::<Ix2>()?.to_owned()) })
                .collect::<Result<Vec<_>>>()?;
            let (h, new_states) = C::step(weights, units, x_t, &states)?;
            Ok((h.into_dyn(), new_states.into_iter().map(|s| s.into_dyn()).collect()))
        };
        let result = backend::rnn(
            step,
            std::slice::from_ref(x),
            initial_states,
            self.config.go_backwards,
            mask,
        )?;

        if self.config.stateful {
            self.updates = C::STATE_NAMES
                .iter()
                .zip(&result.states)
                .map(|(state, value)| StateUpdate {
                    variable: format!("{}/{}", self.config.name, state),
                    value: value.clone(),
                })
                .collect();
            self.states = result.states;
        }

        if self.config.return_sequences {
            Ok(Nested::One(result.outputs))
        } else {
            Ok(Nested::One(result.last_output))
        }
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        let shape = input_shape.expect_single(&self.config.name)?;
        if shape.rank() != 3 {
            return Err(LayerError::shape(format!(
                "recurrent layer `{}` expects (batch, time, features) inputs, got {}",
                self.config.name, shape
            )));
        }
        let units = Some(self.config.units);
        let dims = if self.config.return_sequences {
            vec![shape.batch(), shape.timesteps(), units]
        } else {
            vec![shape.batch(), units]
        };
        Ok(Nested::One(Shape::new(dims)))
    }

    fn compute_mask(&self, _inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>> {
        if self.config.return_sequences {
            Ok(mask.clone())
        } else {
            Ok(Nested::One(None))
        }
    }

    fn get_config(&self) -> LayerConfig {
        C::wrap_config(self.config.clone())
    }

    fn trainable(&self) -> bool {
        self.config.trainable
    }

    fn weights(&self) -> Vec<&Weight> {
        self.weights.iter().collect()
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        assign_weights(&self.config.name, &mut self.weights, weights)
    }

    fn updates(&self) -> Vec<&StateUpdate> {
        self.updates.iter().collect()
    }

    fn stateful(&self) -> bool {
        self.config.stateful
    }

    fn reset_states(&mut self) -> Result<()> {
        if self.config.stateful && self.built {
            let batch = self.states.first().map(|s| s.shape()[0]).unwrap_or(0);
            self.states = self.zero_states(batch);
            self.updates.clear();
        }
        Ok(())
    }
}

impl<C: Cell> Recurrent for RecurrentLayer<C> {
    fn recurrent_config(&self) -> &RecurrentConfig {
        &self.config
    }

    fn set_initial_weights(&mut self, weights: Vec<Tensor>) {
        self.initial_weights = Some(weights);
    }

    fn weight_count(&self) -> usize {
        WEIGHT_NAMES.len()
    }

    fn as_layer(&self) -> &dyn Layer {
        self
    }

    fn as_layer_mut(&mut self) -> &mut dyn Layer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use crate::layers::{no_mask, LSTM, GRU};

    fn sequence() -> Tensor {
        Array3::from_shape_fn((2, 4, 3), |(b, t, f)| (b + 1) as f64 * 0.1 + t as f64 * 0.05 - f as f64 * 0.02)
            .into_dyn()
    }

    #[test]
    fn test_lstm_output_shapes() {
        let mut last = LSTM::new(RecurrentConfig::new(5));
        let mut seq = LSTM::new(RecurrentConfig::new(5).with_return_sequences(true));
        let shape: Nested<Shape> = Shape::with_dynamic_batch(&[4, 3]).into();
        last.build(&shape).unwrap();
        seq.build(&shape).unwrap();

        let x: Nested<Tensor> = sequence().into();
        assert_eq!(last.call(&x, &no_mask()).unwrap().into_single().unwrap().shape(), &[2, 5]);
        assert_eq!(seq.call(&x, &no_mask()).unwrap().into_single().unwrap().shape(), &[2, 4, 5]);
        assert_eq!(
            seq.output_shape_for(&shape).unwrap(),
            Nested::One(Shape::with_dynamic_batch(&[4, 5]))
        );
    }

    #[test]
    fn test_go_backwards_matches_reversed_input() {
        let shape: Nested<Shape> = Shape::with_dynamic_batch(&[4, 3]).into();
        let mut forward = GRU::new(RecurrentConfig::new(2).with_return_sequences(true));
        forward.build(&shape).unwrap();
        let mut backward = GRU::new(forward.recurrent_config().reversed());
        backward.build(&shape).unwrap();
        backward.set_weights(&forward.get_weights()).unwrap();

        let x = sequence();
        let reversed_x = backend::reverse(&x, 1);
        let expected = forward.call(&reversed_x.into(), &no_mask()).unwrap().into_single().unwrap();
        let actual = backward.call(&x.into(), &no_mask()).unwrap().into_single().unwrap();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_stateful_layer_carries_and_resets_state() {
        let mut layer = LSTM::new(RecurrentConfig::new(3).with_stateful(true));
        layer.build(&Shape::fixed(&[2, 4, 3]).into()).unwrap();
        assert!(layer.stateful());

        let x: Nested<Tensor> = sequence().into();
        let first = layer.call(&x, &no_mask()).unwrap().into_single().unwrap();
        assert_eq!(layer.updates().len(), 2);
        let second = layer.call(&x, &no_mask()).unwrap().into_single().unwrap();
        assert!(first.iter().zip(second.iter()).any(|(a, b)| (a - b).abs() > 1e-12));

        layer.reset_states().unwrap();
        assert!(layer.states().iter().all(|s| s.iter().all(|&v| v == 0.0)));
        let third = layer.call(&x, &no_mask()).unwrap().into_single().unwrap();
        for (a, b) in first.iter().zip(third.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_stateful_requires_batch_size() {
        let mut layer = LSTM::new(RecurrentConfig::new(3).with_stateful(true));
        let err = layer.build(&Shape::with_dynamic_batch(&[4, 3]).into()).unwrap_err();
        assert!(matches!(err, LayerError::Configuration(_)));
    }

    #[test]
    fn test_initial_weights_applied_on_build() {
        let shape: Nested<Shape> = Shape::with_dynamic_batch(&[4, 3]).into();
        let mut source = LSTM::new(RecurrentConfig::new(2));
        source.build(&shape).unwrap();

        let mut target = LSTM::new(RecurrentConfig::new(2));
        target.set_initial_weights(source.get_weights());
        target.build(&shape).unwrap();
        assert_eq!(target.get_weights(), source.get_weights());
        assert_eq!(target.get_weights().len(), target.weight_count());
    }

    #[test]
    fn test_mask_dropped_without_sequences() {
        let layer = LSTM::new(RecurrentConfig::new(2));
        let mask = Nested::One(Some(ndarray::arr2(&[[1.0, 0.0]]).into_dyn()));
        let x: Nested<Tensor> = sequence().into();
        assert_eq!(layer.compute_mask(&x, &mask).unwrap(), Nested::One(None));
    }
}
