//! The layer abstraction the wrappers delegate to, and the built-in layers.
//!
//! Every capability a wrapper may ask about (weights, losses, updates,
//! constraints, state, learning phase) is a trait method with an empty
//! default, so callers never probe for optional attributes.

use std::fmt;

use crate::backend::{Mask, Tensor};
use crate::constraints::Constraints;
use crate::error::{LayerError, Result};
use crate::regularizers::Regularizer;
use crate::shape::{Nested, Shape};

pub mod config;
pub mod dropout;
pub mod gru;
pub mod linear;
pub mod lstm;
pub mod recurrent;

pub use config::{layer_from_config, recurrent_from_config, LayerConfig};
pub use dropout::{Dropout, DropoutConfig};
pub use gru::GRU;
pub use linear::{Linear, LinearConfig};
pub use lstm::LSTM;
pub use recurrent::{RecurrentConfig, RecurrentLayer};

/// A named parameter tensor. Names are qualified by the owning layer
/// (`"forward_lstm/w_ih"`), so collections merged across layers stay unique.
#[derive(Clone, Debug, PartialEq)]
pub struct Weight {
    pub name: String,
    pub value: Tensor,
}

impl Weight {
    pub fn new(layer: &str, local: &str, value: Tensor) -> Self {
        Weight {
            name: format!("{}/{}", layer, local),
            value,
        }
    }
}

/// Scalar loss contribution registered by a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LossTerm {
    pub source: String,
    pub value: f64,
    /// Dims of the inputs the loss was computed for.
    pub input_dims: Vec<Vec<usize>>,
}

/// State assignment performed by a stateful layer during its last call.
#[derive(Clone, Debug, PartialEq)]
pub struct StateUpdate {
    pub variable: String,
    pub value: Tensor,
}

/// Mask argument meaning "no mask".
pub fn no_mask() -> Nested<Mask> {
    Nested::One(None)
}

/// Base layer contract: build once on a static shape, then call on tensors.
pub trait Layer: fmt::Debug {
    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    fn class_name(&self) -> &'static str;

    fn built(&self) -> bool;

    fn build(&mut self, input_shape: &Nested<Shape>) -> Result<()>;

    fn call(&mut self, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Tensor>>;

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>>;

    fn compute_mask(&self, _inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>> {
        Ok(mask.clone())
    }

    fn get_config(&self) -> LayerConfig;

    fn trainable(&self) -> bool {
        true
    }

    /// Every weight in declaration order; `get_weights`/`set_weights` use this order.
    fn weights(&self) -> Vec<&Weight> {
        Vec::new()
    }

    fn trainable_weights(&self) -> Vec<&Weight> {
        if self.trainable() {
            self.weights()
        } else {
            Vec::new()
        }
    }

    fn non_trainable_weights(&self) -> Vec<&Weight> {
        if self.trainable() {
            Vec::new()
        } else {
            self.weights()
        }
    }

    fn get_weights(&self) -> Vec<Tensor> {
        self.weights().into_iter().map(|w| w.value.clone()).collect()
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()>;

    fn updates(&self) -> Vec<&StateUpdate> {
        Vec::new()
    }

    fn losses(&self) -> Vec<&LossTerm> {
        Vec::new()
    }

    fn constraints(&self) -> Constraints {
        Constraints::new()
    }

    fn activity_regularizer(&self) -> Option<&Regularizer> {
        None
    }

    /// Whether the layer behaves differently in training and inference.
    fn uses_learning_phase(&self) -> bool {
        false
    }

    fn stateful(&self) -> bool {
        false
    }

    fn reset_states(&mut self) -> Result<()> {
        Ok(())
    }

    fn train(&mut self) {}

    fn eval(&mut self) {}
}

/// A recurrent layer: iterates over the time axis of `(batch, time, ...)`.
pub trait Recurrent: Layer {
    fn recurrent_config(&self) -> &RecurrentConfig;

    /// Weights applied by `set_weights` right after the layer is built.
    fn set_initial_weights(&mut self, weights: Vec<Tensor>);

    /// Number of weight tensors the layer holds once built.
    fn weight_count(&self) -> usize;

    fn as_layer(&self) -> &dyn Layer;

    fn as_layer_mut(&mut self) -> &mut dyn Layer;
}

pub(crate) fn single_input<'a>(layer: &str, inputs: &'a Nested<Tensor>) -> Result<&'a Tensor> {
    inputs.single().ok_or_else(|| {
        LayerError::shape(format!(
            "layer `{}` expects a single input tensor, got {}",
            layer,
            inputs.len()
        ))
    })
}

/// Replaces the values of `slots` with `values`, checking count and shapes.
pub(crate) fn assign_weights(layer: &str, slots: &mut [Weight], values: &[Tensor]) -> Result<()> {
    if slots.len() != values.len() {
        return Err(LayerError::shape(format!(
            "layer `{}` expects {} weights, but was given {}",
            layer,
            slots.len(),
            values.len()
        )));
    }
    for (slot, value) in slots.iter().zip(values) {
        if slot.value.shape() != value.shape() {
            return Err(LayerError::shape(format!(
                "weight `{}` has shape {:?}, but was given {:?}",
                slot.name,
                slot.value.shape(),
                value.shape()
            )));
        }
    }
    for (slot, value) in slots.iter_mut().zip(values) {
        slot.value = value.clone();
    }
    Ok(())
}
