use std::collections::BTreeMap;
use ndarray::Axis;
use serde::{Serialize, Deserialize};

use crate::backend::Tensor;
use crate::error::Result;
use crate::layers::Layer;

/// Constraint projected onto a weight after each update, keyed by the
/// qualified weight name.
pub type Constraints = BTreeMap<String, Constraint>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    NonNeg,
    /// Caps the L2 norm of each output unit's incoming weights.
    MaxNorm(f64),
    UnitNorm,
}

impl Constraint {
    /// Projects `w`; norms are taken per row of a 2-D kernel, over the whole
    /// tensor otherwise.
    pub fn apply(&self, w: &Tensor) -> Tensor {
        match *self {
            Constraint::NonNeg => w.mapv(|v| v.max(0.0)),
            Constraint::MaxNorm(max) => rescale_rows(w, |norm| if norm > max { max / norm } else { 1.0 }),
            Constraint::UnitNorm => rescale_rows(w, |norm| 1.0 / norm),
        }
    }
}

/// Projects every constrained weight of `layer` in place; callers run this
/// after each weight update. Wrappers expose their inner layers' constraints,
/// so one call covers the whole tree.
pub fn apply_constraints(layer: &mut dyn Layer) -> Result<()> {
    let constraints = layer.constraints();
    if constraints.is_empty() {
        return Ok(());
    }
    let projected: Vec<Tensor> = layer
        .weights()
        .into_iter()
        .map(|w| match constraints.get(&w.name) {
            Some(constraint) => constraint.apply(&w.value),
            None => w.value.clone(),
        })
        .collect();
    layer.set_weights(&projected)
}

fn rescale_rows<F: Fn(f64) -> f64>(w: &Tensor, factor: F) -> Tensor {
    let eps = 1e-7;
    let mut projected = w.clone();
    if w.ndim() == 2 {
        for mut row in projected.axis_iter_mut(Axis(0)) {
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt() + eps;
            let scale = factor(norm);
            row.mapv_inplace(|v| v * scale);
        }
    } else {
        let norm = w.iter().map(|v| v * v).sum::<f64>().sqrt() + eps;
        let scale = factor(norm);
        projected.mapv_inplace(|v| v * scale);
    }
    projected
}
