use ndarray::{s, Array2, ArrayView2};

use crate::activations::sigmoid;
use crate::error::{LayerError, Result};
use crate::layers::recurrent::{matrix, vector, Cell, RecurrentConfig, RecurrentLayer};
use crate::layers::{LayerConfig, Weight};

/// LSTM step equations, batch-first:
/// - i_t = σ(x_t W_iiᵀ + b_ii + h_t-1 W_hiᵀ + b_hi)
/// - f_t = σ(x_t W_ifᵀ + b_if + h_t-1 W_hfᵀ + b_hf)
/// - g_t = tanh(x_t W_igᵀ + b_ig + h_t-1 W_hgᵀ + b_hg)
/// - o_t = σ(x_t W_ioᵀ + b_io + h_t-1 W_hoᵀ + b_ho)
/// - c_t = f_t ⊙ c_t-1 + i_t ⊙ g_t
/// - h_t = o_t ⊙ tanh(c_t)
#[derive(Clone, Debug)]
pub struct LSTMCell;

/// Long short-term memory layer.
pub type LSTM = RecurrentLayer<LSTMCell>;

impl Cell for LSTMCell {
    const CLASS_NAME: &'static str = "LSTM";
    const GATES: usize = 4;
    const STATE_NAMES: &'static [&'static str] = &["h", "c"];

    fn step(
        weights: &[Weight],
        units: usize,
        x: ArrayView2<f64>,
        states: &[Array2<f64>],
    ) -> Result<(Array2<f64>, Vec<Array2<f64>>)> {
        let (hx, cx) = match states {
            [hx, cx] => (hx, cx),
            _ => return Err(LayerError::shape(format!("LSTM expects 2 states, got {}", states.len()))),
        };
        let w_ih = matrix(&weights[0])?;
        let w_hh = matrix(&weights[1])?;
        let b_ih = vector(&weights[2])?;
        let b_hh = vector(&weights[3])?;

        // [input_gate, forget_gate, cell_gate, output_gate]
        let gates = x.dot(&w_ih.t()) + &b_ih + &hx.dot(&w_hh.t()) + &b_hh;

        let input_gate = gates.slice(s![.., 0..units]).mapv(sigmoid);
        let forget_gate = gates.slice(s![.., units..2 * units]).mapv(sigmoid);
        let cell_gate = gates.slice(s![.., 2 * units..3 * units]).mapv(f64::tanh);
        let output_gate = gates.slice(s![.., 3 * units..4 * units]).mapv(sigmoid);

        let cy = &forget_gate * cx + &input_gate * &cell_gate;
        let hy = &output_gate * &cy.mapv(f64::tanh);

        Ok((hy.clone(), vec![hy, cy]))
    }

    fn wrap_config(config: RecurrentConfig) -> LayerConfig {
        LayerConfig::Lstm(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array1};
    use crate::layers::Layer;
    use crate::shape::Shape;

    #[test]
    fn test_lstm_step_with_zero_weights() {
        let mut layer = LSTM::new(RecurrentConfig::new(2));
        layer.build(&Shape::with_dynamic_batch(&[3, 1]).into()).unwrap();
        let zeros: Vec<_> = layer.get_weights().iter().map(|w| w.mapv(|_| 0.0)).collect();
        layer.set_weights(&zeros).unwrap();
        let weights: Vec<Weight> = layer.weights().into_iter().cloned().collect();

        // every gate is σ(0) = 0.5 and g = tanh(0) = 0, so c = 0.5 * c0
        let x = arr2(&[[1.0]]);
        let h0 = Array2::zeros((1, 2));
        let c0 = Array2::from_elem((1, 2), 1.0);
        let (h, states) = LSTMCell::step(&weights, 2, x.view(), &[h0, c0]).unwrap();
        assert!((states[1][[0, 0]] - 0.5).abs() < 1e-12);
        assert!((h[[0, 0]] - 0.5 * 0.5f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_lstm_weight_layout() {
        let mut layer = LSTM::new(RecurrentConfig::new(3).with_name("lstm"));
        layer.build(&Shape::with_dynamic_batch(&[5, 2]).into()).unwrap();
        let shapes: Vec<Vec<usize>> = layer.weights().iter().map(|w| w.value.shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![12, 2], vec![12, 3], vec![12], vec![12]]);
        assert_eq!(layer.weights()[0].name, "lstm/w_ih");
        assert_eq!(layer.get_weights()[2], Array1::<f64>::zeros(12).into_dyn());
    }
}
