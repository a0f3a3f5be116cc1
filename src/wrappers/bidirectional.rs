//! Runs a recurrent layer over a sequence in both directions.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Serialize, Deserialize};

use crate::backend::{self, Mask, Tensor};
use crate::error::{LayerError, Result};
use crate::layers::{recurrent_from_config, Layer, LayerConfig, LossTerm, Recurrent, RecurrentConfig};
use crate::shape::{InputSpec, Nested, Shape};
use crate::wrappers::{WrapStrategy, Wrapper};

/// How the forward and backward outputs are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    Sum,
    Mul,
    Ave,
    Concat,
}

impl MergeMode {
    pub const ALL: [MergeMode; 4] = [MergeMode::Sum, MergeMode::Mul, MergeMode::Ave, MergeMode::Concat];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Sum => "sum",
            MergeMode::Mul => "mul",
            MergeMode::Ave => "ave",
            MergeMode::Concat => "concat",
        }
    }

    /// `None` means the outputs are returned unmerged.
    pub fn parse(name: Option<&str>) -> Result<Option<MergeMode>> {
        name.map(str::parse).transpose()
    }

    pub fn merge(&self, forward: &Tensor, backward: &Tensor) -> Result<Tensor> {
        match self {
            MergeMode::Sum => backend::add(forward, backward),
            MergeMode::Mul => backend::multiply(forward, backward),
            MergeMode::Ave => backend::average(forward, backward),
            MergeMode::Concat => {
                if forward.shape() != backward.shape() {
                    return Err(LayerError::shape(format!(
                        "cannot concatenate outputs of shapes {:?} and {:?}",
                        forward.shape(),
                        backward.shape()
                    )));
                }
                backend::concatenate(&[forward.clone(), backward.clone()], None)
            }
        }
    }
}

impl FromStr for MergeMode {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        MergeMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                LayerError::config(format!(
                    "invalid merge mode `{}`; merge mode should be one of {{\"sum\", \"mul\", \"ave\", \"concat\", None}}",
                    s
                ))
            })
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Serialized form. `layer` is the template the two directions were cloned
/// from; `merge_mode` is `null` for unmerged outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidirectionalConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub trainable: bool,
    pub layer: Box<LayerConfig>,
    #[serde(default)]
    pub merge_mode: Option<String>,
}

/// A forward and a backward copy of one recurrent layer, outputs merged.
pub type Bidirectional = Wrapper<BidirectionalStrategy>;

#[derive(Debug)]
pub struct BidirectionalStrategy {
    template: LayerConfig,
    forward: Box<dyn Recurrent>,
    backward: Box<dyn Recurrent>,
    merge_mode: Option<MergeMode>,
}

/// The template's config with the iteration direction flipped.
fn reversed_config(config: &LayerConfig) -> Result<LayerConfig> {
    match config {
        LayerConfig::Lstm(c) => Ok(LayerConfig::Lstm(c.reversed())),
        LayerConfig::Gru(c) => Ok(LayerConfig::Gru(c.reversed())),
        other => Err(LayerError::config(format!(
            "Bidirectional needs a recurrent layer, got {}",
            other.class_name()
        ))),
    }
}

impl Wrapper<BidirectionalStrategy> {
    pub fn new(layer: &dyn Recurrent, merge_mode: Option<MergeMode>) -> Result<Self> {
        Self::from_template(layer.get_config(), merge_mode, None)
    }

    /// Like [`Bidirectional::new`]; the first `N / 2` of `weights` initialise
    /// the forward layer and the rest the backward layer.
    pub fn with_weights(layer: &dyn Recurrent, merge_mode: Option<MergeMode>, weights: Vec<Tensor>) -> Result<Self> {
        Self::from_template(layer.get_config(), merge_mode, Some(weights))
    }

    /// Like [`Bidirectional::new`], with the merge mode given by name.
    pub fn with_mode_name(layer: &dyn Recurrent, merge_mode: Option<&str>) -> Result<Self> {
        Self::new(layer, MergeMode::parse(merge_mode)?)
    }

    pub fn from_config(config: &BidirectionalConfig) -> Result<Self> {
        let merge_mode = MergeMode::parse(config.merge_mode.as_deref())?;
        Ok(Self::from_template((*config.layer).clone(), merge_mode, None)?
            .with_name(&config.name)
            .with_trainable(config.trainable))
    }

    fn from_template(template: LayerConfig, merge_mode: Option<MergeMode>, weights: Option<Vec<Tensor>>) -> Result<Self> {
        let mut forward = recurrent_from_config(&template)?;
        let mut backward = recurrent_from_config(&reversed_config(&template)?)?;
        forward.set_name(format!("forward_{}", template.name()));
        backward.set_name(format!("backward_{}", template.name()));

        if let Some(mut weights) = weights {
            let backward_weights = weights.split_off(weights.len() / 2);
            let expected = forward.weight_count();
            if weights.len() != expected || backward_weights.len() != expected {
                return Err(LayerError::shape(format!(
                    "initial weights split into {} forward and {} backward; each direction of `{}` expects {}",
                    weights.len(),
                    backward_weights.len(),
                    template.name(),
                    expected
                )));
            }
            forward.set_initial_weights(weights);
            backward.set_initial_weights(backward_weights);
        }

        let name = format!("bidirectional_{}", template.name());
        let strategy = BidirectionalStrategy {
            template,
            forward,
            backward,
            merge_mode,
        };
        Ok(Wrapper::from_strategy(name, true, strategy))
    }

    pub fn forward_layer(&self) -> &dyn Recurrent {
        self.strategy.forward.as_ref()
    }

    pub fn backward_layer(&self) -> &dyn Recurrent {
        self.strategy.backward.as_ref()
    }

    pub fn merge_mode(&self) -> Option<MergeMode> {
        self.strategy.merge_mode
    }

    pub fn return_sequences(&self) -> bool {
        self.strategy.recurrent_config().return_sequences
    }
}

impl BidirectionalStrategy {
    fn recurrent_config(&self) -> &RecurrentConfig {
        self.forward.recurrent_config()
    }

    fn output_of(layer: &mut dyn Recurrent, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Tensor> {
        let name = layer.name().to_string();
        layer
            .as_layer_mut()
            .call(inputs, mask)?
            .into_single()
            .ok_or_else(|| LayerError::shape(format!("recurrent layer `{}` returned several outputs", name)))
    }
}

impl WrapStrategy for BidirectionalStrategy {
    const CLASS_NAME: &'static str = "Bidirectional";

    fn inner_layers(&self) -> Vec<&dyn Layer> {
        vec![self.forward.as_layer(), self.backward.as_layer()]
    }

    fn inner_layers_mut(&mut self) -> Vec<&mut dyn Layer> {
        vec![self.forward.as_layer_mut(), self.backward.as_layer_mut()]
    }

    fn build(&mut self, name: &str, input_shape: &Nested<Shape>) -> Result<Vec<InputSpec>> {
        debug!("building both directions of `{}` on {:?}", name, input_shape);
        if !self.forward.built() {
            self.forward.as_layer_mut().build(input_shape)?;
        }
        if !self.backward.built() {
            self.backward.as_layer_mut().build(input_shape)?;
        }
        Ok(input_shape.iter().cloned().map(InputSpec::new).collect())
    }

    fn call(
        &mut self,
        _name: &str,
        _specs: &[InputSpec],
        inputs: &Nested<Tensor>,
        mask: &Nested<Mask>,
    ) -> Result<(Nested<Tensor>, Vec<LossTerm>)> {
        let forward = Self::output_of(self.forward.as_mut(), inputs, mask)?;
        let mut backward = Self::output_of(self.backward.as_mut(), inputs, mask)?;
        if self.recurrent_config().return_sequences {
            backward = backend::reverse(&backward, 1);
        }

        let output = match self.merge_mode {
            Some(mode) => Nested::One(mode.merge(&forward, &backward)?),
            None => Nested::Many(vec![forward, backward]),
        };
        Ok((output, Vec::new()))
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        let shape = self
            .forward
            .output_shape_for(input_shape)?
            .into_single()
            .ok_or_else(|| LayerError::shape("recurrent layers produce a single output shape"))?;
        Ok(match self.merge_mode {
            Some(MergeMode::Concat) => Nested::One(shape.with_last(shape.last().map(|d| d * 2))),
            Some(_) => Nested::One(shape),
            None => Nested::Many(vec![shape.clone(), shape]),
        })
    }

    fn compute_mask(&self, _inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>> {
        if !self.recurrent_config().return_sequences {
            return Ok(Nested::One(None));
        }
        let mask = mask.iter().next().cloned().flatten();
        Ok(match self.merge_mode {
            Some(_) => Nested::One(mask),
            None => Nested::Many(vec![mask.clone(), mask]),
        })
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        let (forward, backward) = weights.split_at(weights.len() / 2);
        self.forward.set_weights(forward)?;
        self.backward.set_weights(backward)
    }

    fn config(&self, name: &str, trainable: bool) -> LayerConfig {
        LayerConfig::Bidirectional(BidirectionalConfig {
            name: name.to_string(),
            trainable,
            layer: Box::new(self.template.clone()),
            merge_mode: self.merge_mode.map(|mode| mode.as_str().to_string()),
        })
    }
}
