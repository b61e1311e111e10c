//! Loss functions.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::traits::Loss;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs.
pub const EPSILON: f32 = 1e-7;

fn clip(p: f32) -> f32 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// A loss function for classification problems, with one-hot targets.
///
/// The output `yh` of the network must be normalized e.g. by using a
/// `SoftmaxLayer`.
#[derive(Debug, Clone, Copy)]
pub struct CategoricalCrossEntropy;

impl Loss<Ix2> for CategoricalCrossEntropy {
    fn loss(&self, y: ArrayView2<'_, f32>, yh: ArrayView2<'_, f32>) -> f32 {
        assert_eq!(y.shape(), yh.shape());
        let n = yh.nrows();
        if n == 0 {
            return 0.0;
        }
        let mut total = 0.0;
        Zip::from(&y).and(&yh).for_each(|&y, &yh| {
            if y != 0.0 {
                total -= y * clip(yh).ln();
            }
        });
        total / n as f32
    }

    fn deriv(&self, y: ArrayView2<'_, f32>, yh: ArrayView2<'_, f32>) -> Array2<f32> {
        assert_eq!(y.shape(), yh.shape());
        let n = yh.nrows() as f32;
        Zip::from(&y)
            .and(&yh)
            .map_collect(|&y, &yh| -y / (n * clip(yh)))
    }
}

/// Mean of the squared differences, over every element.
#[derive(Debug, Clone, Copy)]
pub struct MeanSquaredError;

impl<D: Dimension> Loss<D> for MeanSquaredError {
    fn loss(&self, y: ArrayView<'_, f32, D>, yh: ArrayView<'_, f32, D>) -> f32 {
        assert_eq!(y.shape(), yh.shape());
        Zip::from(&y)
            .and(&yh)
            .fold(0.0, |acc, &y, &yh| acc + (yh - y).powi(2))
            / y.len().max(1) as f32
    }

    fn deriv(&self, y: ArrayView<'_, f32, D>, yh: ArrayView<'_, f32, D>) -> Array<f32, D> {
        assert_eq!(y.shape(), yh.shape());
        let scale = 2.0 / y.len().max(1) as f32;
        Zip::from(&y)
            .and(&yh)
            .map_collect(|&y, &yh| scale * (yh - y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_entropy_by_hand() {
        let y = array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]];
        let yh = array![[0.2, 0.7, 0.1], [0.5, 0.25, 0.25]];
        let loss = CategoricalCrossEntropy.loss(y.view(), yh.view());
        let expected = -(0.7f32.ln() + 0.5f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-6, "{loss} != {expected}");

        let d = CategoricalCrossEntropy.deriv(y.view(), yh.view());
        assert!((d[[0, 1]] + 1.0 / (2.0 * 0.7)).abs() < 1e-6);
        assert!((d[[1, 0]] + 1.0).abs() < 1e-6);
        assert_eq!(d[[0, 0]], 0.0);
    }

    #[test]
    fn cross_entropy_clips_zero_probability() {
        let y = array![[1.0, 0.0]];
        let yh = array![[0.0, 1.0]];
        let loss = CategoricalCrossEntropy.loss(y.view(), yh.view());
        assert!(loss.is_finite());
        assert!((loss + EPSILON.ln()).abs() < 1e-3);
    }

    #[test]
    fn mean_squared_error() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let yh = array![1.0, 2.0, 3.0, 6.0];
        assert_eq!(MeanSquaredError.loss(y.view(), yh.view()), 1.0);
        assert_eq!(
            MeanSquaredError.deriv(y.view(), yh.view()),
            array![0.0, 0.0, 0.0, 1.0]
        );
    }
}
