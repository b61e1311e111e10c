//! Convolutions for image processing.
//!
//! Convolution layers take input of the shape `(num_images, img_height, img_width, num_img_channels)`.
//!
//! Convolution kernels have the shape `(num_output_channels, ker_height, ker_width, num_image_channels)`
//!
//! Kernel sizes are `(height, width)`.

use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

use crate::layers::glorot_limit;
use crate::{Build, Layer, Mode};

/// How a convolution treats the border of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding. The output shrinks by `kernel_size - 1` along each axis.
    Valid,
    /// Zero padding so that the output has the same height and width as the
    /// input. With an even kernel the extra row/column of padding goes at the
    /// bottom/right.
    Same,
}

/// Unroll every kernel-sized window of `image` into a row ("im2col").
///
/// The shape of `image` is `(img_height, img_width, num_img_channels)`.
/// The result has shape `(out_height * out_width, ker_height * ker_width * num_img_channels)`,
/// with columns in `(ky, kx, channel)` order to match the kernel layout.
/// Pixels that fall into the padding are zero.
fn im2col(
    image: ArrayView3<f32>,
    (kh, kw): (usize, usize),
    (pad_top, pad_left): (usize, usize),
    (oh, ow): (usize, usize),
) -> Array2<f32> {
    let (xh, xw, xc) = image.dim();
    let mut cols = Array2::zeros((oh * ow, kh * kw * xc));
    for oy in 0..oh {
        for ox in 0..ow {
            let mut row = cols.row_mut(oy * ow + ox);
            for ky in 0..kh {
                let Some(iy) = (oy + ky).checked_sub(pad_top).filter(|&iy| iy < xh) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = (ox + kx).checked_sub(pad_left).filter(|&ix| ix < xw) else {
                        continue;
                    };
                    let start = (ky * kw + kx) * xc;
                    row.slice_mut(s![start..start + xc])
                        .assign(&image.slice(s![iy, ix, ..]));
                }
            }
        }
    }
    cols
}

/// The adjoint of `im2col`: add each row of `cols` back into the pixels its
/// window came from.
fn col2im(
    cols: ArrayView2<f32>,
    (kh, kw): (usize, usize),
    (pad_top, pad_left): (usize, usize),
    (oh, ow): (usize, usize),
    mut image: ArrayViewMut3<f32>,
) {
    let (xh, xw, xc) = image.dim();
    for oy in 0..oh {
        for ox in 0..ow {
            let row = cols.row(oy * ow + ox);
            for ky in 0..kh {
                let Some(iy) = (oy + ky).checked_sub(pad_top).filter(|&iy| iy < xh) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = (ox + kx).checked_sub(pad_left).filter(|&ix| ix < xw) else {
                        continue;
                    };
                    let start = (ky * kw + kx) * xc;
                    let mut pixel = image.slice_mut(s![iy, ix, ..]);
                    pixel += &row.slice(s![start..start + xc]);
                }
            }
        }
    }
}

/// 2D convolution with stride 1.
///
/// In addition to the convolution kernel, each output channel gets a bias, a
/// constant added to each pixel of that channel.
#[derive(Debug)]
pub struct Conv2dLayer {
    kernel_shape: Ix4,
    padding: Padding,
}

impl Conv2dLayer {
    /// Create a convolutional layer.
    ///
    /// kernel_shape must be (num_output_channels, height, width, num_img_channels).
    ///
    /// For example, to use 64 3x3 filters on a grayscale image,
    /// use `(64, 3, 3, 1)`.
    pub fn new(kernel_shape: Ix4, padding: Padding) -> Self {
        assert!(
            kernel_shape.size() > 0,
            "convolution kernel shape {kernel_shape:?} has a zero-sized axis"
        );
        Conv2dLayer {
            kernel_shape,
            padding,
        }
    }

    /// Padding added above and to the left of the image.
    fn pad(&self) -> (usize, usize) {
        let (_, kh, kw, _) = self.kernel_shape.into_pattern();
        match self.padding {
            Padding::Valid => (0, 0),
            Padding::Same => ((kh - 1) / 2, (kw - 1) / 2),
        }
    }

    /// The kernel as an `(oc, kh * kw * ic)` matrix, and the biases.
    fn kernel<'a>(&self, params: ArrayView1<'a, f32>) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let (oc, kh, kw, ic) = self.kernel_shape.into_pattern();
        let (kernel, bias) = params.split_at(Axis(0), self.kernel_shape.size());
        let kernel = kernel
            .into_shape((oc, kh * kw * ic))
            .expect("params must be contiguous");
        (kernel, bias)
    }
}

impl Layer<Ix4> for Conv2dLayer {
    type Output = Ix4;

    fn name(&self) -> String {
        "conv2d".to_string()
    }

    fn output_shape(&self, input_shape: Ix4) -> Self::Output {
        let (xn, xh, xw, xc) = input_shape.into_pattern();
        let (oc, kh, kw, ic) = self.kernel_shape.into_pattern();
        assert_eq!(ic, xc, "incompatible number of channels: images={xc}, kernel={ic}");
        match self.padding {
            Padding::Valid => {
                assert!(
                    xh >= kh && xw >= kw,
                    "{kh}x{kw} kernel does not fit in {xh}x{xw} image without padding"
                );
                Ix4(xn, xh - kh + 1, xw - kw + 1, oc)
            }
            Padding::Same => Ix4(xn, xh, xw, oc),
        }
    }

    fn num_params(&self) -> usize {
        let (oc, kh, kw, ic) = self.kernel_shape.into_pattern();
        oc * kh * kw * ic + oc
    }

    fn init_params(&self, params: ArrayViewMut1<'_, f32>, rng: &mut StdRng) {
        let (oc, kh, kw, ic) = self.kernel_shape.into_pattern();
        let limit = glorot_limit(kh * kw * ic, kh * kw * oc);
        let (mut kernel, _bias) = params.split_at(Axis(0), self.kernel_shape.size());
        kernel.assign(&Array::random_using(kernel.len(), Uniform::new(-limit, limit), rng));
    }

    fn apply(
        &self,
        params: ArrayView1<f32>,
        x: ArrayView4<f32>,
        _tmp: ArrayViewMut2<f32>,
        mut y: ArrayViewMut4<f32>,
        _mode: Mode,
    ) {
        let (_, kh, kw, _) = self.kernel_shape.into_pattern();
        let (_, oh, ow, oc) = y.dim();
        let (kernel, bias) = self.kernel(params);
        for (x, mut y) in x.outer_iter().zip(y.outer_iter_mut()) {
            let cols = im2col(x, (kh, kw), self.pad(), (oh, ow));
            let z = cols.dot(&kernel.t());
            y.assign(&z.to_shape((oh, ow, oc)).expect("one row per output pixel"));
            y += &bias;
        }
    }

    fn derivatives(
        &self,
        params: ArrayView1<f32>,
        x: ArrayView4<f32>,
        _tmp: ArrayView2<f32>,
        dz: ArrayView4<f32>,
        dp: ArrayViewMut1<f32>,
    ) -> Array4<f32> {
        let (_, kh, kw, _) = self.kernel_shape.into_pattern();
        let (_, oh, ow, oc) = dz.dim();
        let (kernel, _bias) = self.kernel(params);

        let mut dk = Array2::<f32>::zeros(kernel.raw_dim());
        let mut dx = Array4::zeros(x.raw_dim());
        for ((x, dz), dx) in x.outer_iter().zip(dz.outer_iter()).zip(dx.outer_iter_mut()) {
            let cols = im2col(x, (kh, kw), self.pad(), (oh, ow));
            let dz = Array::from_iter(dz.iter().copied())
                .into_shape((oh * ow, oc))
                .expect("dz has one row per output pixel");
            dk += &dz.t().dot(&cols);
            let dcols = dz.dot(&kernel);
            col2im(dcols.view(), (kh, kw), self.pad(), (oh, ow), dx);
        }

        let (dp_kernel, mut dp_bias) = dp.split_at(Axis(0), self.kernel_shape.size());
        dp_kernel
            .into_shape(dk.raw_dim())
            .expect("dp should be contiguous")
            .assign(&dk);
        dp_bias.assign(&dz.sum_axis(Axis(2)).sum_axis(Axis(1)).sum_axis(Axis(0)));
        dx
    }
}

/// Declaration of a [`Conv2dLayer`]; the number of input channels is taken
/// from the incoming shape.
#[derive(Debug, Clone, Copy)]
pub struct Conv2d {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub padding: Padding,
}

impl Conv2d {
    /// `filters` square `kernel_size` filters, zero-padded to keep the image size.
    pub fn same(filters: usize, kernel_size: usize) -> Self {
        Conv2d {
            filters,
            kernel_size: (kernel_size, kernel_size),
            padding: Padding::Same,
        }
    }

    /// `filters` square `kernel_size` filters without padding.
    pub fn valid(filters: usize, kernel_size: usize) -> Self {
        Conv2d {
            filters,
            kernel_size: (kernel_size, kernel_size),
            padding: Padding::Valid,
        }
    }
}

impl Build<Ix4> for Conv2d {
    type Layer = Conv2dLayer;

    fn build(self, input_shape: Ix4) -> Conv2dLayer {
        let (_, h, w, c) = input_shape.into_pattern();
        let (kh, kw) = self.kernel_size;
        assert!(self.filters > 0, "a convolution needs at least one filter");
        if self.padding == Padding::Valid {
            assert!(
                h >= kh && w >= kw,
                "{kh}x{kw} kernel does not fit in {h}x{w} image without padding"
            );
        }
        Conv2dLayer::new(Ix4(self.filters, kh, kw, c), self.padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_size() {
        let layer = Conv2d::same(4, 3).build(Ix4(1, 5, 7, 2));
        assert_eq!(layer.output_shape(Ix4(3, 5, 7, 2)), Ix4(3, 5, 7, 4));
        assert_eq!(layer.num_params(), 4 * 3 * 3 * 2 + 4);
    }

    #[test]
    fn valid_padding_shrinks() {
        let layer = Conv2d::valid(4, 3).build(Ix4(1, 5, 7, 2));
        assert_eq!(layer.output_shape(Ix4(3, 5, 7, 2)), Ix4(3, 3, 5, 4));
    }

    #[test]
    fn identity_kernel() {
        // A 3x3 kernel with a single 1 in the middle copies the image.
        let layer = Conv2dLayer::new(Ix4(1, 3, 3, 1), Padding::Same);
        let mut params = Array1::<f32>::zeros(layer.num_params());
        params[4] = 1.0;
        params[9] = 0.5; // bias
        let x = Array4::from_shape_fn((1, 3, 4, 1), |(_, i, j, _)| (i * 4 + j) as f32);
        let mut y = Array4::zeros(layer.output_shape(x.raw_dim()));
        layer.apply(
            params.view(),
            x.view(),
            Array2::zeros((1, 0)).view_mut(),
            y.view_mut(),
            Mode::Infer,
        );
        assert_eq!(y, &x + 0.5);
    }

    #[test]
    fn same_padding_zero_fills_border() {
        // A kernel of all ones sums each 3x3 neighborhood; corners only see 4 pixels.
        let layer = Conv2dLayer::new(Ix4(1, 3, 3, 1), Padding::Same);
        let mut params = Array1::<f32>::ones(layer.num_params());
        params[9] = 0.0;
        let x = Array4::<f32>::ones((1, 3, 3, 1));
        let mut y = Array4::zeros(layer.output_shape(x.raw_dim()));
        layer.apply(
            params.view(),
            x.view(),
            Array2::zeros((1, 0)).view_mut(),
            y.view_mut(),
            Mode::Infer,
        );
        assert_eq!(y.slice(s![0, .., .., 0]), array![[4.0, 6.0, 4.0], [6.0, 9.0, 6.0], [4.0, 6.0, 4.0]]);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn kernel_too_big() {
        Conv2d::valid(1, 5).build(Ix4(1, 4, 4, 1));
    }
}
