//! Layers that own other layers.
//!
//! A [`Wrapper`] carries the bookkeeping every wrapper shares (name, build
//! state, input specs, learning-phase flag) and delegates shape and compute
//! logic to a [`WrapStrategy`]. Weight, loss, update and constraint
//! collections are never stored on the wrapper: they are recomputed from the
//! inner layers on every access.

use std::fmt;

use log::debug;

use crate::backend::{Mask, Tensor};
use crate::constraints::Constraints;
use crate::error::{LayerError, Result};
use crate::layers::{Layer, LayerConfig, LossTerm, StateUpdate, Weight};
use crate::shape::{InputSpec, Nested, Shape};

pub mod bidirectional;
pub mod time_distributed;

pub use bidirectional::{Bidirectional, BidirectionalConfig, BidirectionalStrategy, MergeMode};
pub use time_distributed::{TimeDistributed, TimeDistributedConfig, TimeDistributedStrategy};

/// The part of a wrapper that differs between wrapper kinds.
pub trait WrapStrategy: fmt::Debug {
    const CLASS_NAME: &'static str;

    /// Owned layers, in the order their collections are concatenated.
    fn inner_layers(&self) -> Vec<&dyn Layer>;

    fn inner_layers_mut(&mut self) -> Vec<&mut dyn Layer>;

    /// Builds the inner layer(s) and returns one spec per wrapper input.
    fn build(&mut self, name: &str, input_shape: &Nested<Shape>) -> Result<Vec<InputSpec>>;

    /// Runs the wrapped computation; also returns the loss terms the wrapper
    /// registers on its own behalf for this call.
    fn call(
        &mut self,
        name: &str,
        specs: &[InputSpec],
        inputs: &Nested<Tensor>,
        mask: &Nested<Mask>,
    ) -> Result<(Nested<Tensor>, Vec<LossTerm>)>;

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>>;

    fn compute_mask(&self, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>>;

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()>;

    fn config(&self, name: &str, trainable: bool) -> LayerConfig;
}

/// A layer delegating to the layer(s) owned by its strategy.
#[derive(Debug)]
pub struct Wrapper<S: WrapStrategy> {
    name: String,
    trainable: bool,
    built: bool,
    uses_learning_phase: bool,
    input_specs: Vec<InputSpec>,
    input_shape: Option<Nested<Shape>>,
    losses: Vec<LossTerm>,
    strategy: S,
}

impl<S: WrapStrategy> Wrapper<S> {
    pub(crate) fn from_strategy(name: String, trainable: bool, strategy: S) -> Self {
        // read once; later changes to the inner layers are not re-synced
        let uses_learning_phase = strategy.inner_layers().iter().any(|l| l.uses_learning_phase());
        Wrapper {
            name,
            trainable,
            built: false,
            uses_learning_phase,
            input_specs: Vec::new(),
            input_shape: None,
            losses: Vec::new(),
            strategy,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn input_specs(&self) -> &[InputSpec] {
        &self.input_specs
    }

    /// Output shape for the shape the wrapper was built on.
    pub fn output_shape(&self) -> Result<Nested<Shape>> {
        let shape = self
            .input_shape
            .as_ref()
            .ok_or_else(|| LayerError::NotBuilt(self.name.clone()))?;
        self.strategy.output_shape_for(shape)
    }

    fn check_inputs(&self, inputs: &Nested<Tensor>) -> Result<()> {
        if inputs.len() != self.input_specs.len() {
            return Err(LayerError::shape(format!(
                "layer `{}` expects {} input(s), but it received {}",
                self.name,
                self.input_specs.len(),
                inputs.len()
            )));
        }
        for (index, (spec, x)) in self.input_specs.iter().zip(inputs.iter()).enumerate() {
            spec.check(&self.name, index, x.shape())?;
        }
        Ok(())
    }
}

impl<S: WrapStrategy> Layer for Wrapper<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn class_name(&self) -> &'static str {
        S::CLASS_NAME
    }

    fn built(&self) -> bool {
        self.built
    }

    fn build(&mut self, input_shape: &Nested<Shape>) -> Result<()> {
        let specs = self.strategy.build(&self.name, input_shape)?;
        debug!(
            "built {} `{}` with {} input spec(s)",
            S::CLASS_NAME,
            self.name,
            specs.len()
        );
        self.input_specs = specs;
        self.input_shape = Some(input_shape.clone());
        self.built = true;
        Ok(())
    }

    fn call(&mut self, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Tensor>> {
        if !self.built {
            return Err(LayerError::NotBuilt(self.name.clone()));
        }
        self.check_inputs(inputs)?;
        let (outputs, losses) = self.strategy.call(&self.name, &self.input_specs, inputs, mask)?;
        self.losses = losses;
        Ok(outputs)
    }

    fn output_shape_for(&self, input_shape: &Nested<Shape>) -> Result<Nested<Shape>> {
        self.strategy.output_shape_for(input_shape)
    }

    fn compute_mask(&self, inputs: &Nested<Tensor>, mask: &Nested<Mask>) -> Result<Nested<Mask>> {
        self.strategy.compute_mask(inputs, mask)
    }

    fn get_config(&self) -> LayerConfig {
        self.strategy.config(&self.name, self.trainable)
    }

    fn trainable(&self) -> bool {
        self.trainable
    }

    fn weights(&self) -> Vec<&Weight> {
        self.strategy
            .inner_layers()
            .into_iter()
            .flat_map(|layer| layer.weights())
            .collect()
    }

    fn trainable_weights(&self) -> Vec<&Weight> {
        if !self.trainable {
            return Vec::new();
        }
        self.strategy
            .inner_layers()
            .into_iter()
            .flat_map(|layer| layer.trainable_weights())
            .collect()
    }

    fn non_trainable_weights(&self) -> Vec<&Weight> {
        if !self.trainable {
            return self.weights();
        }
        self.strategy
            .inner_layers()
            .into_iter()
            .flat_map(|layer| layer.non_trainable_weights())
            .collect()
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        self.strategy.set_weights(weights)
    }

    fn updates(&self) -> Vec<&StateUpdate> {
        self.strategy
            .inner_layers()
            .into_iter()
            .flat_map(|layer| layer.updates())
            .collect()
    }

    fn losses(&self) -> Vec<&LossTerm> {
        let mut losses: Vec<&LossTerm> = self
            .strategy
            .inner_layers()
            .into_iter()
            .flat_map(|layer| layer.losses())
            .collect();
        losses.extend(self.losses.iter());
        losses
    }

    fn constraints(&self) -> Constraints {
        let mut constraints = Constraints::new();
        for layer in self.strategy.inner_layers() {
            constraints.extend(layer.constraints());
        }
        constraints
    }

    fn uses_learning_phase(&self) -> bool {
        self.uses_learning_phase
    }

    fn stateful(&self) -> bool {
        self.strategy.inner_layers().iter().any(|layer| layer.stateful())
    }

    fn reset_states(&mut self) -> Result<()> {
        for layer in self.strategy.inner_layers_mut() {
            layer.reset_states()?;
        }
        Ok(())
    }

    fn train(&mut self) {
        for layer in self.strategy.inner_layers_mut() {
            layer.train();
        }
    }

    fn eval(&mut self) {
        for layer in self.strategy.inner_layers_mut() {
            layer.eval();
        }
    }
}
