use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

use crate::layers::glorot_limit;
use crate::{Build, Layer, Mode};

/// A fully connected layer: `y = x W + b`.
///
/// Parameters are the `(ni, no)` weight matrix in row-major order followed by
/// the `no` biases.
#[derive(Debug)]
pub struct DenseLayer {
    /// Number of inputs. Input shape is `(N, ni)`.
    ni: usize,
    /// Number of cells, i.e. outputs. Output shape is `(N, no)`.
    no: usize,
}

impl DenseLayer {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        assert!(num_outputs > 0, "a dense layer needs at least one unit");
        DenseLayer {
            ni: num_inputs,
            no: num_outputs,
        }
    }

    fn weights<'a>(&self, params: ArrayView1<'a, f32>) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let (w, b) = params.split_at(Axis(0), self.ni * self.no);
        let w = w
            .into_shape((self.ni, self.no))
            .expect("size of params should be self.num_params()");
        (w, b)
    }
}

impl Layer<Ix2> for DenseLayer {
    type Output = Ix2;

    fn name(&self) -> String {
        "dense".to_string()
    }

    fn output_shape(&self, input_shape: Ix2) -> Ix2 {
        Ix2(input_shape[0], self.no)
    }

    fn num_params(&self) -> usize {
        self.ni * self.no + self.no
    }

    fn init_params(&self, params: ArrayViewMut1<'_, f32>, rng: &mut StdRng) {
        let limit = glorot_limit(self.ni, self.no);
        let (mut w, _b) = params.split_at(Axis(0), self.ni * self.no);
        w.assign(&Array::random_using(w.len(), Uniform::new(-limit, limit), rng));
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, Ix2>,
        _tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
        _mode: Mode,
    ) {
        assert_eq!(x.shape()[1], self.ni);
        let (w, b) = self.weights(params);
        y.assign(&x.dot(&w));
        y += &b;
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, Ix2>,
        _tmp: ArrayView2<'_, f32>,
        dz: ArrayView<'_, f32, Self::Output>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, Ix2> {
        let ni = self.ni;
        let no = self.no;
        let n = x.shape()[0];
        assert_eq!(x.shape()[1], ni);
        assert_eq!(dz.shape(), [n, no]);

        let (w, _b) = self.weights(params);
        let (dw, mut db) = dp.split_at(Axis(0), ni * no);
        dw.into_shape((ni, no))
            .expect("dp should be contiguous")
            .assign(&x.t().dot(&dz));
        db.assign(&dz.sum_axis(Axis(0)));

        let dx = dz.dot(&w.t());
        assert_eq!(dx.shape(), x.shape());
        dx
    }
}

/// Declaration of a [`DenseLayer`] with `units` outputs; the number of inputs
/// is taken from the incoming shape.
#[derive(Debug, Clone, Copy)]
pub struct Dense {
    pub units: usize,
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Dense { units }
    }
}

impl Build<Ix2> for Dense {
    type Layer = DenseLayer;

    fn build(self, input_shape: Ix2) -> DenseLayer {
        DenseLayer::new(input_shape[1], self.units)
    }
}
