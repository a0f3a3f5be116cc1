use ndarray::ArrayD;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Bernoulli;
use serde::{Serialize, Deserialize};

use crate::backend::{Mask, Tensor};
use crate::error::{LayerError, Result};
use crate::layers::{single_input, Layer, LayerConfig};
use crate::shape::{Nested, Shape};

fn default_true() -> bool {
    true
}

/// Configuration of a [`Dropout`] layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub trainable: bool,
    pub rate: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DropoutConfig {
    pub fn new(rate: f64) -> Self {
        DropoutConfig {
            name: "dropout".to_string(),
            trainable: true,
            rate,
            seed: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Inverted dropout: zeroes elements with probability `rate` in training mode
/// and rescales the survivors; the identity in evaluation mode.
#[derive(Clone, Debug)]
pub struct Dropout {
    config: DropoutConfig,
    is_training: bool,
    built: bool,
    rng: StdRng,
    mask: Option<Tensor>,
}

impl Dropout {
    pub fn new(config: DropoutConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.rate) {
            return Err(LayerError::config(format!(
                "dropout rate must be between 0.0 and 1.0, got {}",
                config.rate
            )));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Dropout {
            config,
            is_training: true,
            built: false,
            rng,
            mask: None,
        })
    }

    pub fn is_training(&self) -> bool {
        self.is_training
    }

    pub fn get_last_mask(&self) -> Option<&Tensor> {
        self.mask.as_ref()
    }
}

impl Layer for Dropout {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn set_name(&mut self, name: String) {
        self.config.name = name;
    }

    fn class_name(&self) -> &'static str {
        "Dropout"
    }

    fn built(&self) -> bool {
        self.built
    }

    fn build(&mut self, input_shape: &Nested<Shape>) -> Result<()> {
        input_shape.expect_single(&self.config.name)?;
        self.built = true;
        Ok(())
    }

    fn call(&mut self, inputs: &Nested<Tensor>, _mask: &Nested<Mask>) -> Result<Nested<Tensor>> {
        let x = single_input(&self.config.name, inputs)?;
        if !self.is_training || self.config.rate == 0.0 {
            return Ok(Nested::One(x.clone()));
        }

        let keep_prob = 1.0 - self.config.rate;
        let bernoulli = Bernoulli::new(keep_prob)
            .map_err(|e| LayerError::config(format!("invalid dropout rate: {}", e)))?;
        let mask = ArrayD::<bool>::random_using(x.raw_dim(), bernoulli, &mut self.rng)
            .mapv(|keep| if keep { 1.0 } else { 0.0 });

        let y = if keep_prob > 0.0 {
            x * &mask / keep_prob
        } else {
            Tensor::zeros(x.raw_dim())
        };
        self.mask = Some(mask);
        Ok(Nested::One(y))
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        Ok(Nested::One(input_shape.expect_single(&self.config.name)?.clone()))
    }

    fn get_config(&self) -> LayerConfig {
        LayerConfig::Dropout(self.config.clone())
    }

    fn trainable(&self) -> bool {
        self.config.trainable
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        if weights.is_empty() {
            Ok(())
        } else {
            Err(LayerError::shape(format!(
                "layer `{}` has no weights, but was given {}",
                self.config.name,
                weights.len()
            )))
        }
    }

    fn uses_learning_phase(&self) -> bool {
        true
    }

    fn train(&mut self) {
        self.is_training = true;
    }

    fn eval(&mut self) {
        self.is_training = false;
        self.mask = None;
    }
}
