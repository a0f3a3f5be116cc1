use ndarray::{Array2, ArrayD, Ix1, Ix2, IxDyn};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::backend::{Mask, Tensor};
use crate::constraints::{Constraint, Constraints};
use crate::error::{LayerError, Result};
use crate::layers::{assign_weights, single_input, Layer, LayerConfig, Weight};
use crate::regularizers::Regularizer;
use crate::shape::{Nested, Shape};

fn default_true() -> bool {
    true
}

/// Configuration of a [`Linear`] layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub trainable: bool,
    pub units: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_true")]
    pub use_bias: bool,
    #[serde(default)]
    pub activity_regularizer: Option<Regularizer>,
    #[serde(default)]
    pub kernel_constraint: Option<Constraint>,
}

impl LinearConfig {
    pub fn new(units: usize) -> Self {
        LinearConfig {
            name: "linear".to_string(),
            trainable: true,
            units,
            activation: Activation::Linear,
            use_bias: true,
            activity_regularizer: None,
            kernel_constraint: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.use_bias = false;
        self
    }

    pub fn with_activity_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.activity_regularizer = Some(regularizer);
        self
    }

    pub fn with_kernel_constraint(mut self, constraint: Constraint) -> Self {
        self.kernel_constraint = Some(constraint);
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }
}

/// A fully connected layer applied over the last axis of its input.
///
/// Performs `output = activation(input · kernelᵀ + bias)` where the kernel has
/// shape `(units, input_dim)` and the bias `(units,)`. Any leading axes are
/// treated as batch axes.
#[derive(Clone, Debug)]
pub struct Linear {
    config: LinearConfig,
    weights: Vec<Weight>,
    input_dim: Option<usize>,
    built: bool,
}

impl Linear {
    pub fn new(config: LinearConfig) -> Self {
        Linear {
            config,
            weights: Vec::new(),
            input_dim: None,
            built: false,
        }
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn units(&self) -> usize {
        self.config.units
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.input_dim
    }

    /// Number of parameters once built.
    pub fn num_parameters(&self) -> usize {
        self.weights.iter().map(|w| w.value.len()).sum()
    }

    fn kernel_name(&self) -> String {
        format!("{}/kernel", self.config.name)
    }
}

impl Layer for Linear {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn set_name(&mut self, name: String) {
        self.config.name = name;
    }

    fn class_name(&self) -> &'static str {
        "Linear"
    }

    fn built(&self) -> bool {
        self.built
    }

    fn build(&mut self, input_shape: &Nested<Shape>) -> Result<()> {
        let shape = input_shape.expect_single(&self.config.name)?;
        if shape.rank() < 2 {
            return Err(LayerError::shape(format!(
                "layer `{}` expects inputs of rank >= 2, got {}",
                self.config.name, shape
            )));
        }
        let input_dim = shape.last().ok_or_else(|| {
            LayerError::shape(format!(
                "the last axis of the input to `{}` must be known, got {}",
                self.config.name, shape
            ))
        })?;

        // Xavier/Glorot initialization: scale by sqrt(2 / (input_dim + units))
        let units = self.config.units;
        let scale = (2.0 / (input_dim + units) as f64).sqrt();
        let kernel = Array2::random((units, input_dim), Uniform::new(-scale, scale)).into_dyn();

        let name = self.config.name.clone();
        self.weights = vec![Weight::new(&name, "kernel", kernel)];
        if self.config.use_bias {
            self.weights.push(Weight::new(&name, "bias", ArrayD::zeros(IxDyn(&[units]))));
        }
        self.input_dim = Some(input_dim);
        self.built = true;
        Ok(())
    }

    fn call(&mut self, inputs: &Nested<Tensor>, _mask: &Nested<Mask>) -> Result<Nested<Tensor>> {
        let x = single_input(&self.config.name, inputs)?;
        let input_dim = self
            .input_dim
            .ok_or_else(|| LayerError::NotBuilt(self.config.name.clone()))?;
        if x.ndim() < 2 || x.shape()[x.ndim() - 1] != input_dim {
            return Err(LayerError::shape(format!(
                "layer `{}` expects (..., {}) inputs, got {:?}",
                self.config.name,
                input_dim,
                x.shape()
            )));
        }

        let mut out_dims = x.shape()[..x.ndim() - 1].to_vec();
        let rows: usize = out_dims.iter().product();
        let flat = Array2::from_shape_vec((rows, input_dim), x.iter().cloned().collect())?;

        let kernel = self.weights[0].value.view().into_dimensionality::<Ix2>()?;
        let mut y = flat.dot(&kernel.t());
        if let Some(bias) = self.weights.get(1) {
            let bias = bias.value.view().into_dimensionality::<Ix1>()?;
            y += &bias;
        }

        out_dims.push(self.config.units);
        let y = Tensor::from_shape_vec(IxDyn(&out_dims), y.iter().cloned().collect())?;
        Ok(Nested::One(self.config.activation.apply(&y)))
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        let shape = input_shape.expect_single(&self.config.name)?;
        if shape.rank() < 2 {
            return Err(LayerError::shape(format!(
                "layer `{}` expects inputs of rank >= 2, got {}",
                self.config.name, shape
            )));
        }
        Ok(Nested::One(shape.with_last(Some(self.config.units))))
    }

    fn get_config(&self) -> LayerConfig {
        LayerConfig::Linear(self.config.clone())
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

    fn constraints(&self) -> Constraints {
        let mut constraints = Constraints::new();
        if let (Some(constraint), true) = (self.config.kernel_constraint, self.built) {
            constraints.insert(self.kernel_name(), constraint);
        }
        constraints
    }

    fn activity_regularizer(&self) -> Option<&Regularizer> {
        self.config.activity_regularizer.as_ref()
    }
}
