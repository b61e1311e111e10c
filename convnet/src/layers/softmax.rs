use ndarray::prelude::*;
use ndarray::Zip;

use crate::{Build, Layer, Mode};

/// Layer that converts each row of the input to a probability distribution,
/// using the [softmax function](https://en.wikipedia.org/wiki/Softmax_function).
///
/// This is often the last layer in a classification network.
#[derive(Debug)]
pub struct SoftmaxLayer;

/// Row-wise softmax, shifted by the row maximum so `exp` can't overflow.
fn softmax_rows(x: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut s = x.to_owned();
    for mut row in s.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    s
}

impl Layer<Ix2> for SoftmaxLayer {
    type Output = Ix2;

    fn name(&self) -> String {
        "softmax".to_string()
    }

    fn output_shape(&self, input_shape: Ix2) -> Ix2 {
        input_shape
    }

    fn apply(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        _tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
        _mode: Mode,
    ) {
        y.assign(&softmax_rows(x));
    }

    fn derivatives(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        _tmp: ArrayView2<'_, f32>,
        dz: ArrayView2<'_, f32>,
        _dp: ArrayViewMut1<'_, f32>,
    ) -> Array2<f32> {
        // ∂z[i,k]/∂x[i,j] = s[i,k] * ((j == k) - s[i,j]), so
        // dx[i,j] = s[i,j] * (dz[i,j] - sum(dz[i,k] * s[i,k] for k)).
        let s = softmax_rows(x);
        let dot = (&dz * &s).sum_axis(Axis(1));
        let mut dx = Array2::zeros(x.raw_dim());
        Zip::from(dx.rows_mut())
            .and(s.rows())
            .and(dz.rows())
            .and(&dot)
            .for_each(|mut dx, s, dz, &dot| {
                Zip::from(&mut dx)
                    .and(&s)
                    .and(&dz)
                    .for_each(|dx, &s, &dz| *dx = s * (dz - dot));
            });
        dx
    }
}

/// Declaration of a [`SoftmaxLayer`].
#[derive(Debug, Clone, Copy)]
pub struct Softmax;

impl Build<Ix2> for Softmax {
    type Layer = SoftmaxLayer;

    fn build(self, _input_shape: Ix2) -> SoftmaxLayer {
        SoftmaxLayer
    }
}
