//! Activation functions used by the built-in layers.

use serde::{Serialize, Deserialize};

use crate::backend::Tensor;

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Elementwise activation applied to a layer's output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Tanh,
    Sigmoid,
    Relu,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Tensor {
        match self {
            Activation::Linear => x.clone(),
            Activation::Tanh => x.mapv(f64::tanh),
            Activation::Sigmoid => x.mapv(sigmoid),
            Activation::Relu => x.mapv(|v| v.max(0.0)),
        }
    }
}
