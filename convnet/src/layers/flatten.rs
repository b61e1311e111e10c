use ndarray::prelude::*;

use crate::array_util::example_size;
use crate::{Build, Layer, Mode};

/// Reshape inputs to matrix form.
///
/// This layer takes inputs with example-index as the first axis and any number
/// of other axes. It flattens each example into a row, leaving a 2D matrix.
///
/// That is, the actual input shape is `input_shape`, except with the first
/// dimension changed to the number of examples; and the output shape is
/// `(num_examples, input_shape.size())`.
#[derive(Debug)]
pub struct FlattenLayer<D> {
    /// The input shape of this layer, for a batch with one example.
    ///
    /// Invariant: `input_shape.as_array_view()[0] == 1`
    input_shape: D,
}

impl<D> FlattenLayer<D>
where
    D: Dimension,
{
    pub fn new(mut input_shape: D) -> Self {
        input_shape.as_array_view_mut()[0] = 1;
        FlattenLayer { input_shape }
    }
}

impl<D: Dimension> Layer<D> for FlattenLayer<D> {
    type Output = Ix2;

    fn name(&self) -> String {
        "flatten".to_string()
    }

    fn output_shape(&self, input_shape: D) -> Ix2 {
        Ix2(input_shape[0], example_size(&input_shape))
    }

    fn apply(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        _tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
        _mode: Mode,
    ) {
        assert_eq!(
            example_size(&x.raw_dim()),
            self.input_shape.size(),
            "rows of x should match self.input_shape"
        );
        // `x` may be a strided view into scratch space, so copy in logical
        // order rather than reshaping.
        for (y, &x) in y.iter_mut().zip(x.iter()) {
            *y = x;
        }
    }

    fn derivatives(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        _tmp: ArrayView2<'_, f32>,
        dz: ArrayView2<'_, f32>,
        _dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D> {
        Array::from_iter(dz.iter().copied())
            .into_shape(x.raw_dim())
            .expect("rows of dz should match self.input_shape")
    }
}

/// Declaration of a [`FlattenLayer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl<D: Dimension> Build<D> for Flatten {
    type Layer = FlattenLayer<D>;

    fn build(self, input_shape: D) -> FlattenLayer<D> {
        FlattenLayer::new(input_shape)
    }
}
