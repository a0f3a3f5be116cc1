//! Eager tensor primitives the layers and wrappers are written against.
//!
//! Every function materialises its result immediately, so a `call` that
//! returns has fully resolved its output.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Serialize, Deserialize};

use crate::error::{LayerError, Result};

pub type Tensor = ArrayD<f64>;

/// `(batch, time)` tensor of 0.0/1.0, or no mask at all.
pub type Mask = Option<Tensor>;

/// How `TimeDistributed` applies its inner layer along the time axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Step-wise when any input declares a batch size, reshape otherwise.
    #[default]
    Auto,
    StepWise,
    Reshape,
}

/// Backend-level switches that are not part of any layer's config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Refuse to run sequence wrappers whose time length is not declared.
    pub require_static_timesteps: bool,
    pub strategy: ExecutionStrategy,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static_timesteps(mut self, required: bool) -> Self {
        self.require_static_timesteps = required;
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

pub fn int_shape(x: &Tensor) -> Vec<usize> {
    x.shape().to_vec()
}

/// Reshapes `x`; at most one entry of `dims` may be `-1` and is inferred.
pub fn reshape(x: &Tensor, dims: &[isize]) -> Result<Tensor> {
    let mut inferred = None;
    let mut known = 1usize;
    for (axis, &dim) in dims.iter().enumerate() {
        match dim {
            -1 if inferred.is_none() => inferred = Some(axis),
            -1 => return Err(LayerError::shape("reshape can infer at most one axis")),
            d if d < 0 => return Err(LayerError::shape(format!("invalid reshape dimension {}", d))),
            d => known *= d as usize,
        }
    }

    let mut target: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(axis) = inferred {
        if known == 0 || x.len() % known != 0 {
            return Err(LayerError::shape(format!(
                "cannot reshape {:?} into {:?}",
                x.shape(),
                dims
            )));
        }
        target[axis] = x.len() / known;
    }

    Ok(Tensor::from_shape_vec(IxDyn(&target), x.iter().cloned().collect())?)
}

/// Concatenates along `axis`, or along the last axis when `axis` is `None`.
pub fn concatenate(tensors: &[Tensor], axis: Option<usize>) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| LayerError::shape("cannot concatenate an empty list of tensors"))?;
    let axis = axis.unwrap_or_else(|| first.ndim().saturating_sub(1));
    let views: Vec<ArrayViewD<f64>> = tensors.iter().map(|t| t.view()).collect();
    Ok(ndarray::concatenate(Axis(axis), &views)?)
}

pub fn reverse(x: &Tensor, axis: usize) -> Tensor {
    let mut reversed = x.clone();
    reversed.invert_axis(Axis(axis));
    reversed.as_standard_layout().into_owned()
}

/// Tiles `x` `n` times along `axis`; used to broadcast length-1 axes.
pub fn repeat_axis(x: &Tensor, n: usize, axis: usize) -> Result<Tensor> {
    let views = vec![x.view(); n];
    Ok(ndarray::concatenate(Axis(axis), &views)?)
}

/// Longest of several sequence lengths; unknown if any of them is.
pub fn max_length<I: IntoIterator<Item = Option<usize>>>(lengths: I) -> Option<usize> {
    lengths
        .into_iter()
        .try_fold(None, |longest: Option<usize>, len| len.map(|l| Some(longest.map_or(l, |m| m.max(l)))))
        .flatten()
}

/// Stacks along a new leading axis and multiplies it away: logical AND of masks.
pub fn stack_product(tensors: &[&Tensor]) -> Result<Tensor> {
    let views: Vec<ArrayViewD<f64>> = tensors.iter().map(|t| t.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)?;
    Ok(stacked.map_axis(Axis(0), |lane| lane.fold(1.0, |acc, &v| acc * v)))
}

fn check_same_shape(a: &Tensor, b: &Tensor, op: &str) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(LayerError::shape(format!(
            "cannot {} tensors of shapes {:?} and {:?}",
            op,
            a.shape(),
            b.shape()
        )))
    }
}

pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_same_shape(a, b, "add")?;
    Ok(a + b)
}

pub fn multiply(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_same_shape(a, b, "multiply")?;
    Ok(a * b)
}

pub fn average(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(add(a, b)? / 2.0)
}

/// Slice `t` of the time axis.
pub fn time_slice(x: &Tensor, t: usize) -> Tensor {
    x.index_axis(Axis(1), t).to_owned()
}

/// Output of [`rnn`].
#[derive(Clone, Debug)]
pub struct RnnOutput {
    pub last_output: Tensor,
    /// `(batch, time, ...)`, in iteration order.
    pub outputs: Tensor,
    pub states: Vec<Tensor>,
}

/// Applies `step` to every time slice of `inputs`, threading `states` through.
///
/// All inputs must share the same time length. With `go_backwards` the slices
/// are visited from last to first and `outputs` is collected in that order.
/// Where `mask[b, t] == 0` the previous output and states are carried over.
pub fn rnn<F>(
    mut step: F,
    inputs: &[Tensor],
    initial_states: Vec<Tensor>,
    go_backwards: bool,
    mask: Option<&Tensor>,
) -> Result<RnnOutput>
where
    F: FnMut(&[Tensor], &[Tensor]) -> Result<(Tensor, Vec<Tensor>)>,
{
    let first = inputs
        .first()
        .ok_or_else(|| LayerError::shape("rnn needs at least one input"))?;
    if first.ndim() < 3 {
        return Err(LayerError::shape(format!(
            "rnn expects (batch, time, ...) inputs, got {:?}",
            first.shape()
        )));
    }
    let (batch, timesteps) = (first.shape()[0], first.shape()[1]);
    if timesteps == 0 {
        return Err(LayerError::shape("rnn cannot iterate over an empty time axis"));
    }
    if let Some(x) = inputs.iter().find(|x| x.ndim() < 2 || x.shape()[1] != timesteps) {
        return Err(LayerError::shape(format!(
            "rnn inputs disagree on the time axis: {:?} vs {:?}",
            first.shape(),
            x.shape()
        )));
    }
    if let Some(m) = mask {
        if m.shape() != [batch, timesteps] {
            return Err(LayerError::shape(format!(
                "mask of shape {:?} does not match (batch, time) = ({}, {})",
                m.shape(),
                batch,
                timesteps
            )));
        }
    }

    let order: Vec<usize> = if go_backwards {
        (0..timesteps).rev().collect()
    } else {
        (0..timesteps).collect()
    };

    let mut states = initial_states;
    let mut outputs: Vec<Tensor> = Vec::with_capacity(timesteps);
    for t in order {
        let slices: Vec<Tensor> = inputs.iter().map(|x| time_slice(x, t)).collect();
        let (output, new_states) = step(&slices, &states)?;

        let (output, new_states) = match mask {
            Some(m) => {
                let keep = m.index_axis(Axis(1), t);
                let previous = outputs
                    .last()
                    .cloned()
                    .unwrap_or_else(|| Tensor::zeros(output.raw_dim()));
                let output = select_rows(&keep, &output, &previous);
                let new_states = if new_states.len() == states.len() {
                    new_states
                        .iter()
                        .zip(&states)
                        .map(|(new, old)| select_rows(&keep, new, old))
                        .collect()
                } else {
                    new_states
                };
                (output, new_states)
            }
            None => (output, new_states),
        };

        outputs.push(output);
        states = new_states;
    }

    let views: Vec<ArrayViewD<f64>> = outputs.iter().map(|o| o.view()).collect();
    let stacked = ndarray::stack(Axis(1), &views)?;
    let last_output = outputs
        .pop()
        .ok_or_else(|| LayerError::shape("rnn produced no outputs"))?;

    Ok(RnnOutput {
        last_output,
        outputs: stacked,
        states,
    })
}

/// Row `b` of the result is `new[b]` where `keep[b] != 0`, else `old[b]`.
fn select_rows(keep: &ArrayViewD<f64>, new: &Tensor, old: &Tensor) -> Tensor {
    let mut selected = old.clone();
    for (b, &k) in keep.iter().enumerate() {
        if k != 0.0 {
            selected
                .index_axis_mut(Axis(0), b)
                .assign(&new.index_axis(Axis(0), b));
        }
    }
    selected
}
