//! Max pooling.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::{Build, Layer, Mode};

/// Max pooling operation for image data.
///
/// The input shape is `(num_images, height, width, num_channels)`. Windows
/// are `size x size` and don't overlap. Rows and columns left over at the
/// bottom and right edge that don't fill a whole window are dropped.
#[derive(Debug)]
pub struct MaxPool2dLayer {
    size: usize,
}

impl MaxPool2dLayer {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "pool size must be at least 1");
        MaxPool2dLayer { size }
    }

    fn window<'a>(&self, x: &'a ArrayView4<f32>, (t, oy, ox, c): (usize, usize, usize, usize)) -> ArrayView2<'a, f32> {
        let n = self.size;
        x.slice(s![t, oy * n..(oy + 1) * n, ox * n..(ox + 1) * n, c])
    }
}

impl Layer<Ix4> for MaxPool2dLayer {
    type Output = Ix4;

    fn name(&self) -> String {
        "max_pooling2d".to_string()
    }

    fn output_shape(&self, input_shape: Ix4) -> Ix4 {
        let (xn, xh, xw, xc) = input_shape.into_pattern();
        assert!(
            xh >= self.size && xw >= self.size,
            "{xh}x{xw} image is smaller than the {0}x{0} pool",
            self.size
        );
        Ix4(xn, xh / self.size, xw / self.size, xc)
    }

    fn apply(
        &self,
        _params: ArrayView1<f32>,
        x: ArrayView4<f32>,
        _tmp: ArrayViewMut2<f32>,
        mut y: ArrayViewMut4<f32>,
        _mode: Mode,
    ) {
        Zip::indexed(&mut y).for_each(|index, y| {
            *y = self.window(&x, index).fold(f32::MIN, |a, &b| a.max(b));
        });
    }

    fn derivatives(
        &self,
        _params: ArrayView1<f32>,
        x: ArrayView4<f32>,
        _tmp: ArrayView2<f32>,
        dz: ArrayView4<f32>,
        _dp: ArrayViewMut1<f32>,
    ) -> Array4<f32> {
        // ∂z/∂x is 1 at the (first) maximal element of each window and 0
        // elsewhere.
        let n = self.size;
        let mut dx = Array::zeros(x.raw_dim());
        Zip::indexed(&dz).for_each(|(t, oy, ox, c), &dz| {
            let mut best = f32::MIN;
            let mut at = (0, 0);
            for ((i, j), &v) in self.window(&x, (t, oy, ox, c)).indexed_iter() {
                if v > best {
                    best = v;
                    at = (i, j);
                }
            }
            dx[[t, oy * n + at.0, ox * n + at.1, c]] += dz;
        });
        dx
    }
}

/// Declaration of a [`MaxPool2dLayer`].
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    pub pool_size: usize,
}

impl MaxPool2d {
    pub fn new(pool_size: usize) -> Self {
        MaxPool2d { pool_size }
    }
}

impl Build<Ix4> for MaxPool2d {
    type Layer = MaxPool2dLayer;

    fn build(self, input_shape: Ix4) -> MaxPool2dLayer {
        let layer = MaxPool2dLayer::new(self.pool_size);
        layer.output_shape(input_shape);
        layer
    }
}
