use ndarray::prelude::*;
use ndarray::{RemoveAxis, Zip};
use rand::Rng;

use crate::array_util::{example_size, reshape_splitting, reshape_splitting_mut};
use crate::{Build, Layer, Mode};

/// Randomly zero some elements during training.
///
/// Each element is dropped with probability `rate`; the survivors are scaled
/// by `1 / (1 - rate)` so the expected output equals the input. At inference
/// time the layer is the identity.
///
/// The mask used for each example is kept in `tmp` for backpropagation.
#[derive(Debug)]
pub struct DropoutLayer {
    rate: f32,
}

impl DropoutLayer {
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&rate),
            "dropout rate must be in [0, 1), got {rate}"
        );
        DropoutLayer { rate }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl<D> Layer<D> for DropoutLayer
where
    D: Dimension + RemoveAxis,
{
    type Output = D;

    fn name(&self) -> String {
        "dropout".to_string()
    }

    fn output_shape(&self, input_shape: D) -> D {
        input_shape
    }

    fn hidden_activations_shape(&self, input_shape: D) -> Ix2 {
        Ix2(input_shape[0], example_size(&input_shape))
    }

    fn apply(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut<'_, f32, D>,
        mode: Mode,
    ) {
        if mode == Mode::Infer {
            y.assign(&x);
            return;
        }

        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mut rng = rand::thread_rng();
        let mut mask = reshape_splitting_mut(tmp, x.raw_dim());
        mask.mapv_inplace(|_| if rng.gen::<f32>() < keep { scale } else { 0.0 });
        Zip::from(&mut y)
            .and(&x)
            .and(&mask)
            .for_each(|y, &x, &m| *y = x * m);
    }

    fn derivatives(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView<'_, f32, D>,
        _dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D> {
        let mask = reshape_splitting(tmp, x.raw_dim());
        Zip::from(&dz).and(&mask).map_collect(|&dz, &m| dz * m)
    }
}

/// Declaration of a [`DropoutLayer`].
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Dropout { rate }
    }
}

impl<D: Dimension + RemoveAxis> Build<D> for Dropout {
    type Layer = DropoutLayer;

    fn build(self, _input_shape: D) -> DropoutLayer {
        DropoutLayer::new(self.rate)
    }
}
