//! Applies one layer independently to every slice of the time axis.

use log::{debug, warn};
use serde::{Serialize, Deserialize};

use crate::backend::{self, BackendConfig, ExecutionStrategy, Mask, Tensor};
use crate::error::{LayerError, Result};
use crate::layers::{layer_from_config, no_mask, Layer, LayerConfig, LossTerm};
use crate::shape::{InputSpec, Nested, Shape};
use crate::wrappers::{WrapStrategy, Wrapper};

fn default_true() -> bool {
    true
}

/// Serialized form: the wrapper's own fields plus the nested inner layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeDistributedConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub trainable: bool,
    pub layer: Box<LayerConfig>,
}

/// `(batch, time, ...)` inputs, each time slice fed to the inner layer.
///
/// Runs step-wise through `backend::rnn` when a batch size is declared, or
/// folds time into batch and calls the inner layer once otherwise. Both give
/// the same result.
pub type TimeDistributed = Wrapper<TimeDistributedStrategy>;

#[derive(Debug)]
pub struct TimeDistributedStrategy {
    layer: Box<dyn Layer>,
    backend: BackendConfig,
}

impl Wrapper<TimeDistributedStrategy> {
    pub fn new(layer: Box<dyn Layer>) -> Self {
        let name = format!("time_distributed_{}", layer.name());
        let strategy = TimeDistributedStrategy {
            layer,
            backend: BackendConfig::default(),
        };
        Wrapper::from_strategy(name, true, strategy)
    }

    pub fn from_config(config: &TimeDistributedConfig) -> Result<Self> {
        let layer = layer_from_config(&config.layer)?;
        Ok(TimeDistributed::new(layer)
            .with_name(&config.name)
            .with_trainable(config.trainable))
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.strategy.backend = backend;
        self
    }

    pub fn layer(&self) -> &dyn Layer {
        self.strategy.layer.as_ref()
    }
}

fn check_rank(shapes: &[Shape]) -> Result<()> {
    match shapes.iter().find(|s| s.rank() < 3) {
        Some(shape) => Err(LayerError::shape(format!(
            "TimeDistributed expects inputs of rank >= 3 (batch, time, ...), got {}",
            shape
        ))),
        None => Ok(()),
    }
}

fn child_shape(shapes: &[Shape]) -> Nested<Shape> {
    Nested::collapse(shapes.iter().map(Shape::without_time_axis).collect())
}

impl TimeDistributedStrategy {
    fn select_path(&self, specs: &[InputSpec]) -> ExecutionStrategy {
        match self.backend.strategy {
            ExecutionStrategy::Auto if specs.iter().any(|s| s.shape.batch().is_some()) => {
                ExecutionStrategy::StepWise
            }
            ExecutionStrategy::Auto => ExecutionStrategy::Reshape,
            forced => forced,
        }
    }

    fn call_single(&mut self, inputs: Vec<Tensor>) -> Result<Tensor> {
        let name = self.layer.name().to_string();
        self.layer
            .call(&Nested::collapse(inputs), &no_mask())?
            .into_single()
            .ok_or_else(|| {
                LayerError::shape(format!("layer `{}` must produce a single output to be time distributed", name))
            })
    }

    fn call_step_wise(&mut self, inputs: &[Tensor]) -> Result<Tensor> {
        let result = backend::rnn(
            |slices: &[Tensor], _states: &[Tensor]| Ok((self.call_single(slices.to_vec())?, Vec::new())),
            inputs,
            Vec::new(),
            false,
            None,
        )?;
        Ok(result.outputs)
    }

    fn call_reshaped(&mut self, specs: &[InputSpec], inputs: &[Tensor], max_len: usize) -> Result<Tensor> {
        let flat = inputs
            .iter()
            .map(|x| {
                let mut dims: Vec<isize> = vec![-1];
                dims.extend(x.shape()[2..].iter().map(|&d| d as isize));
                backend::reshape(x, &dims)
            })
            .collect::<Result<Vec<_>>>()?;
        let y = self.call_single(flat)?;

        let declared: Vec<Shape> = specs.iter().map(|s| s.shape.clone()).collect();
        let output_shape = self.output_shape_for(&Nested::collapse(declared))?;
        let output_shape = output_shape
            .single()
            .ok_or_else(|| LayerError::shape("TimeDistributed inner layer must have a single output"))?;
        let trailing = output_shape.known_trailing(2).ok_or_else(|| {
            LayerError::shape(format!(
                "cannot fold the time axis back: output shape {} has unknown trailing axes",
                output_shape
            ))
        })?;

        let mut dims: Vec<isize> = vec![-1, max_len as isize];
        dims.extend(trailing.iter().map(|&d| d as isize));
        backend::reshape(&y, &dims)
    }
}

impl WrapStrategy for TimeDistributedStrategy {
    const CLASS_NAME: &'static str = "TimeDistributed";

    fn inner_layers(&self) -> Vec<&dyn Layer> {
        vec![self.layer.as_ref()]
    }

    fn inner_layers_mut(&mut self) -> Vec<&mut dyn Layer> {
        vec![self.layer.as_mut()]
    }

    fn build(&mut self, name: &str, input_shape: &Nested<Shape>) -> Result<Vec<InputSpec>> {
        let shapes = input_shape.as_slice();
        check_rank(shapes)?;
        if !self.layer.built() {
            let child = child_shape(shapes);
            debug!("building `{}` inside `{}` on {:?}", self.layer.name(), name, child);
            self.layer.build(&child)?;
        }
        Ok(shapes.iter().cloned().map(InputSpec::new).collect())
    }

    fn call(
        &mut self,
        name: &str,
        specs: &[InputSpec],
        inputs: &Nested<Tensor>,
        _mask: &Nested<Mask>,
    ) -> Result<(Nested<Tensor>, Vec<LossTerm>)> {
        let xs = inputs.as_slice();
        if self.backend.require_static_timesteps && specs.iter().any(|s| s.shape.timesteps().is_none()) {
            return Err(LayerError::config(format!(
                "`{}` needs the sequence length of its inputs to be declared; \
                 give the time axis an explicit size in the input shape",
                name
            )));
        }
        for x in xs {
            if x.ndim() < 3 {
                return Err(LayerError::shape(format!(
                    "`{}` expects inputs of rank >= 3, got {:?}",
                    name,
                    x.shape()
                )));
            }
        }

        let max_len = xs.iter().map(|x| x.shape()[1]).max().unwrap_or(0);
        let mut broadcast = Vec::with_capacity(xs.len());
        for x in xs {
            let len = x.shape()[1];
            if len == max_len {
                broadcast.push(x.clone());
            } else if len == 1 {
                warn!("`{}`: broadcasting an input of time length 1 to {}", name, max_len);
                broadcast.push(backend::repeat_axis(x, max_len, 1)?);
            } else {
                return Err(LayerError::shape(format!(
                    "`{}` inputs have time lengths {} and {}; only length 1 can be broadcast",
                    name, len, max_len
                )));
            }
        }

        let path = self.select_path(specs);
        debug!("`{}` running {:?} over {} step(s)", name, path, max_len);
        let output = match path {
            ExecutionStrategy::Reshape => self.call_reshaped(specs, &broadcast, max_len)?,
            _ => self.call_step_wise(&broadcast)?,
        };

        let mut losses = Vec::new();
        if let Some(regularizer) = self.layer.activity_regularizer() {
            losses.push(LossTerm {
                source: format!("{}/activity_regularizer", name),
                value: regularizer.loss(&output),
                input_dims: xs.iter().map(backend::int_shape).collect(),
            });
        }
        Ok((Nested::One(output), losses))
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        let shapes = input_shape.as_slice();
        check_rank(shapes)?;
        let timesteps = backend::max_length(shapes.iter().map(Shape::timesteps));
        let child_output = self.layer.output_shape_for(&child_shape(shapes))?;
        Ok(child_output.map(|shape| shape.with_time_axis(timesteps)))
    }

    fn compute_mask(&self, _inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>> {
        let masks = match mask {
            Nested::One(single) => return Ok(Nested::One(single.clone())),
            Nested::Many(masks) => masks,
        };
        let present: Vec<&Tensor> = masks.iter().flatten().collect();
        match present.as_slice() {
            [] => Ok(Nested::One(None)),
            [only] => Ok(Nested::One(Some((*only).clone()))),
            several => Ok(Nested::One(Some(backend::stack_product(several)?))),
        }
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        self.layer.set_weights(weights)
    }

    fn config(&self, name: &str, trainable: bool) -> LayerConfig {
        LayerConfig::TimeDistributed(TimeDistributedConfig {
            name: name.to_string(),
            trainable,
            layer: Box::new(self.layer.get_config()),
        })
    }
}
