use ndarray::prelude::*;
use rand::rngs::StdRng;

use crate::array_util::{example_size, reshape_splitting, reshape_splitting_mut};
use crate::{Layer, LayerSummary, Mode};

/// Two layers, one feeding the other.
///
/// Per example, the scratch row is laid out as `[first's scratch | first's
/// output | second's scratch]`. The middle block is what gets passed to
/// `second`, both on the way forward and during backpropagation.
#[derive(Debug)]
pub struct Sequence<L1, L2> {
    first: L1,
    second: L2,
    first_num_params: usize,
    num_params: usize,
}

impl<L1, L2> Sequence<L1, L2> {
    pub(crate) fn new<D>(first: L1, second: L2) -> Self
    where
        D: Dimension,
        L1: Layer<D>,
        L2: Layer<L1::Output>,
    {
        let first_num_params = first.num_params();
        let num_params = first_num_params + second.num_params();
        Self {
            first,
            second,
            first_num_params,
            num_params,
        }
    }

    /// Scratch columns used by `first`, and the width of its output.
    fn split_points<D>(&self, input_shape: &D) -> (usize, usize, <L1 as Layer<D>>::Output)
    where
        D: Dimension,
        L1: Layer<D>,
    {
        let k1 = self.first.hidden_activations_shape(input_shape.clone())[1];
        let hidden_shape = self.first.output_shape(input_shape.clone());
        (k1, example_size(&hidden_shape), hidden_shape)
    }
}

impl<L1, L2, D> Layer<D> for Sequence<L1, L2>
where
    D: Dimension,
    L1: Layer<D>,
    L2: Layer<L1::Output>,
{
    type Output = L2::Output;

    fn name(&self) -> String {
        "sequence".to_string()
    }

    fn output_shape(&self, input_shape: D) -> Self::Output {
        let hidden_shape = self.first.output_shape(input_shape);
        self.second.output_shape(hidden_shape)
    }

    fn num_params(&self) -> usize {
        self.num_params
    }

    fn init_params(&self, params: ArrayViewMut1<'_, f32>, rng: &mut StdRng) {
        let (p1, p2) = params.split_at(Axis(0), self.first_num_params);
        self.first.init_params(p1, rng);
        self.second.init_params(p2, rng);
    }

    fn hidden_activations_shape(&self, input_shape: D) -> Ix2 {
        let (k1, mid, hidden_shape) = self.split_points(&input_shape);
        let k2 = self.second.hidden_activations_shape(hidden_shape)[1];
        Ix2(input_shape[0], k1 + mid + k2)
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayViewMut2<'_, f32>,
        y: ArrayViewMut<'_, f32, Self::Output>,
        mode: Mode,
    ) {
        let (k1, mid, hidden_shape) = self.split_points(&x.raw_dim());
        let (tmp1, rest) = tmp.split_at(Axis(1), k1);
        let (m, tmp2) = rest.split_at(Axis(1), mid);
        let mut m = reshape_splitting_mut(m, hidden_shape);

        let (p1, p2) = params.split_at(Axis(0), self.first_num_params);
        self.first.apply(p1, x, tmp1, m.view_mut(), mode);
        self.second.apply(p2, m.view(), tmp2, y, mode);
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView<'_, f32, Self::Output>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D> {
        let (p1, p2) = params.split_at(Axis(0), self.first_num_params);
        let (dp1, dp2) = dp.split_at(Axis(0), self.first_num_params);

        // The first layer's activations were saved in the middle of `tmp`.
        let (k1, mid, hidden_shape) = self.split_points(&x.raw_dim());
        let (tmp1, rest) = tmp.split_at(Axis(1), k1);
        let (m, tmp2) = rest.split_at(Axis(1), mid);
        let m = reshape_splitting(m, hidden_shape);

        let dm = self.second.derivatives(p2, m, tmp2, dz, dp2);
        self.first.derivatives(p1, x, tmp1, dm.view(), dp1)
    }

    fn summarize(&self, input_shape: D, rows: &mut Vec<LayerSummary>) {
        let hidden_shape = self.first.output_shape(input_shape.clone());
        self.first.summarize(input_shape, rows);
        self.second.summarize(hidden_shape, rows);
    }
}
