use ndarray::{s, Array2, ArrayView2};

use crate::activations::sigmoid;
use crate::error::{LayerError, Result};
use crate::layers::recurrent::{matrix, vector, Cell, RecurrentConfig, RecurrentLayer};
use crate::layers::{LayerConfig, Weight};

/// GRU step equations, batch-first, gate blocks stacked as `[r, z, n]`:
/// - r_t = σ(x_t W_irᵀ + b_ir + h_t-1 W_hrᵀ + b_hr)
/// - z_t = σ(x_t W_izᵀ + b_iz + h_t-1 W_hzᵀ + b_hz)
/// - n_t = tanh(x_t W_inᵀ + b_in + (r_t ⊙ h_t-1) W_hnᵀ + b_hn)
/// - h_t = (1 - z_t) ⊙ h_t-1 + z_t ⊙ n_t
#[derive(Clone, Debug)]
pub struct GRUCell;

/// Gated recurrent unit layer.
pub type GRU = RecurrentLayer<GRUCell>;

impl Cell for GRUCell {
    const CLASS_NAME: &'static str = "GRU";
    const GATES: usize = 3;
    const STATE_NAMES: &'static [&'static str] = &["h"];

    fn step(
        weights: &[Weight],
        units: usize,
        x: ArrayView2<f64>,
        states: &[Array2<f64>],
    ) -> Result<(Array2<f64>, Vec<Array2<f64>>)> {
        let hx = states
            .first()
            .ok_or_else(|| LayerError::shape("GRU expects a hidden state"))?;
        let w_ih = matrix(&weights[0])?;
        let w_hh = matrix(&weights[1])?;
        let b_ih = vector(&weights[2])?;
        let b_hh = vector(&weights[3])?;

        let x_proj = x.dot(&w_ih.t()) + &b_ih;
        let block = |from: usize| from * units..(from + 1) * units;

        let reset_gate = (&x_proj.slice(s![.., block(0)])
            + &hx.dot(&w_hh.slice(s![block(0), ..]).t())
            + &b_hh.slice(s![block(0)]))
            .mapv(sigmoid);
        let update_gate = (&x_proj.slice(s![.., block(1)])
            + &hx.dot(&w_hh.slice(s![block(1), ..]).t())
            + &b_hh.slice(s![block(1)]))
            .mapv(sigmoid);

        let reset_hidden = &reset_gate * hx;
        let new_gate = (&x_proj.slice(s![.., block(2)])
            + &reset_hidden.dot(&w_hh.slice(s![block(2), ..]).t())
            + &b_hh.slice(s![block(2)]))
            .mapv(f64::tanh);

        let hy = update_gate.mapv(|z| 1.0 - z) * hx + &update_gate * &new_gate;
        Ok((hy.clone(), vec![hy]))
    }

    fn wrap_config(config: RecurrentConfig) -> LayerConfig {
        LayerConfig::Gru(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use crate::layers::Layer;
    use crate::shape::Shape;

    #[test]
    fn test_gru_weight_layout() {
        let mut layer = GRU::new(RecurrentConfig::new(4).with_name("gru"));
        layer.build(&Shape::with_dynamic_batch(&[6, 3]).into()).unwrap();
        let shapes: Vec<Vec<usize>> = layer.weights().iter().map(|w| w.value.shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![12, 3], vec![12, 4], vec![12], vec![12]]);
        assert_eq!(layer.class_name(), "GRU");
    }

    #[test]
    fn test_gru_zero_weights_halve_hidden_state() {
        let mut layer = GRU::new(RecurrentConfig::new(2));
        layer.build(&Shape::with_dynamic_batch(&[1, 1]).into()).unwrap();
        let zeros: Vec<_> = layer.get_weights().iter().map(|w| w.mapv(|_| 0.0)).collect();
        layer.set_weights(&zeros).unwrap();
        let weights: Vec<Weight> = layer.weights().into_iter().cloned().collect();

        // z = 0.5 and n = 0, so h' = 0.5 * h
        let h0 = arr2(&[[1.0, -2.0]]);
        let (h, states) = GRUCell::step(&weights, 2, arr2(&[[3.0]]).view(), &[h0]).unwrap();
        assert_eq!(h, arr2(&[[0.5, -1.0]]));
        assert_eq!(states.len(), 1);
    }
}
