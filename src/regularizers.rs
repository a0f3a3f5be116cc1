use serde::{Serialize, Deserialize};

use crate::backend::Tensor;

/// Penalty computed from a layer's output and added to the loss.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regularizer {
    L1(f64),
    L2(f64),
    L1L2 { l1: f64, l2: f64 },
}

impl Regularizer {
    pub fn loss(&self, x: &Tensor) -> f64 {
        let (l1, l2) = match *self {
            Regularizer::L1(l1) => (l1, 0.0),
            Regularizer::L2(l2) => (0.0, l2),
            Regularizer::L1L2 { l1, l2 } => (l1, l2),
        };
        let mut penalty = 0.0;
        if l1 != 0.0 {
            penalty += l1 * x.iter().map(|v| v.abs()).sum::<f64>();
        }
        if l2 != 0.0 {
            penalty += l2 * x.iter().map(|v| v * v).sum::<f64>();
        }
        penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_regularizer_loss() {
        let x = arr2(&[[1.0, -2.0], [3.0, 0.0]]).into_dyn();
        assert!((Regularizer::L1(0.5).loss(&x) - 3.0).abs() < 1e-12);
        assert!((Regularizer::L2(0.1).loss(&x) - 1.4).abs() < 1e-12);
        assert!((Regularizer::L1L2 { l1: 0.5, l2: 0.1 }.loss(&x) - 4.4).abs() < 1e-12);
    }
}
