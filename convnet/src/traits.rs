use std::fmt::Debug;

use ndarray::prelude::*;
use ndarray::RemoveAxis;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::functional::Node;
use crate::layers::{ActivationLayer, DenseLayer, ParallelLayer, Relu, Sequence, SoftmaxLayer};

/// Whether a forward pass is part of training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stochastic layers (dropout) are active, and `tmp` is filled in so that
    /// `derivatives` can run afterwards.
    Train,
    /// Plain inference.
    Infer,
}

/// One row of a model summary: a leaf layer, its output shape and how many
/// parameters it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    /// Output shape, including the mini-batch axis.
    pub output_shape: Vec<usize>,
    pub num_params: usize,
}

pub trait Layer<D>: Debug
where
    D: Dimension,
{
    /// Type of the output shape, typically one of `Ix1`, `Ix2`, etc.
    ///
    /// Axis 0 of this is always the mini-batch axis.
    type Output: Dimension + RemoveAxis;

    /// Short lowercase name shown in model summaries.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    /// For input of the given shape, compute the output shape.
    ///
    /// Axis 0 of both `input_shape` and `output_shape` is the mini-batch axis.
    fn output_shape(&self, input_shape: D) -> Self::Output;

    /// Number of parameters required for this layer.
    ///
    /// The caller provides parameters to the other methods as a single flat
    /// array, which the methods will slice up and reshape into whatever they
    /// need.
    fn num_params(&self) -> usize {
        0
    }

    /// Fill in initial values for this layer's slice of the parameters.
    ///
    /// `params` arrives zeroed, so layers whose parameters start at zero
    /// don't need to override this.
    fn init_params(&self, _params: ArrayViewMut1<'_, f32>, _rng: &mut StdRng) {}

    /// Amount of temporary space this layer needs, per example.
    ///
    /// During training, to avoid redoing work during backpropagation, we save
    /// the output of every layer (and dropout masks). Row `i` of the returned
    /// shape belongs to example `i`, so the scratch buffer can be split up
    /// along with the mini-batch.
    fn hidden_activations_shape(&self, input_shape: D) -> Ix2 {
        Ix2(input_shape[0], 0)
    }

    /// Compute the output of this layer, given the `params` and the input `x`.
    /// Store the output in `y` and store the output of all hidden layers in `tmp`.
    ///
    /// Axis 0 of `x` is always the mini-batch axis; that is, each `x[i]` is a
    /// single training example or prediction task.
    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayViewMut2<'_, f32>,
        y: ArrayViewMut<'_, f32, Self::Output>,
        mode: Mode,
    );

    /// Given x and ∂L/∂z at x, compute partial derivatives ∂L/∂x and ∂L/∂p.
    ///
    /// Store ∂L/∂p in the out-param `dp`, a 1D vector of derivatives. Return
    /// ∂L/∂x.
    ///
    /// A step in backpropagation. `tmp` must be the scratch space filled in
    /// by the last `apply` in `Mode::Train` on the same `x`.
    ///
    /// `dz[i]` is the partial derivative of loss with respect to `z[i]`.
    /// It reflects the effect of that output as it propagates through the rest
    /// of the pipeline.
    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView<'_, f32, Self::Output>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D>;

    /// Append one summary row per leaf layer to `rows`.
    fn summarize(&self, input_shape: D, rows: &mut Vec<LayerSummary>) {
        rows.push(LayerSummary {
            name: self.name(),
            output_shape: self.output_shape(input_shape).slice().to_vec(),
            num_params: self.num_params(),
        });
    }

    fn then<L2>(self, other: L2) -> Sequence<Self, L2>
    where
        Self: Sized,
        L2: Layer<Self::Output>,
    {
        Sequence::new::<D>(self, other)
    }

    fn relu(self) -> Sequence<Self, ActivationLayer<Relu>>
    where
        Self: Sized,
    {
        self.then(ActivationLayer::new(Relu))
    }

    fn dense(self, num_inputs: usize, num_outputs: usize) -> Sequence<Self, DenseLayer>
    where
        Self: Sized + Layer<D, Output = Ix2>,
    {
        self.then(DenseLayer::new(num_inputs, num_outputs))
    }

    fn softmax(self) -> Sequence<Self, SoftmaxLayer>
    where
        Self: Sized + Layer<D, Output = Ix2>,
    {
        self.then(SoftmaxLayer)
    }

    /// Split each mini-batch into chunks of `batch_size` examples and run
    /// them on the Rayon thread pool.
    fn parallel(self, batch_size: usize) -> ParallelLayer<Self>
    where
        Self: Sized,
    {
        ParallelLayer::new(self, batch_size)
    }
}

/// A layer declaration whose remaining sizes (input channels, flattened
/// width, ...) are inferred from the shape of the data flowing into it.
///
/// This is what both [`Sequential::add`](crate::Sequential::add) and the
/// functional [`on`](Build::on) consume.
pub trait Build<D: Dimension> {
    type Layer: Layer<D>;

    /// Create the layer for inputs of shape `input_shape` (batch axis first).
    fn build(self, input_shape: D) -> Self::Layer;

    /// Apply this layer to a symbolic tensor, functional style:
    /// `let x = Conv2d::same(32, 3).on(inputs);`
    fn on<DI, L>(self, node: Node<DI, L>) -> Node<DI, Sequence<L, Self::Layer>>
    where
        Self: Sized,
        DI: Dimension,
        L: Layer<DI, Output = D>,
    {
        node.push(self)
    }
}

/// A loss function. `y` (the target) always has the same shape as `yh` (the
/// model output).
pub trait Loss<D: Dimension>: Debug {
    fn loss(&self, y: ArrayView<'_, f32, D>, yh: ArrayView<'_, f32, D>) -> f32;
    fn deriv(&self, y: ArrayView<'_, f32, D>, yh: ArrayView<'_, f32, D>) -> Array<f32, D>;
}

pub trait ActivationFn: Copy + Clone + Debug {
    const NAME: &'static str;

    fn f(self, x: f32) -> f32;
    fn df(self, x: f32) -> f32;
}
