//! Layer implementations, plus the [`Build`](crate::Build) declarations used
//! to stack them with automatic shape inference.

mod activation;
mod convolutions;
mod dense;
mod dropout;
mod flatten;
mod input;
mod max_pool;
mod parallel;
mod sequence;
mod softmax;

pub use activation::{ActivationLayer, Relu, Sigmoid};
pub use convolutions::{Conv2d, Conv2dLayer, Padding};
pub use dense::{Dense, DenseLayer};
pub use dropout::{Dropout, DropoutLayer};
pub use flatten::{Flatten, FlattenLayer};
pub use input::InputLayer;
pub use max_pool::{MaxPool2d, MaxPool2dLayer};
pub use parallel::ParallelLayer;
pub use sequence::Sequence;
pub use softmax::{Softmax, SoftmaxLayer};

/// Glorot (Xavier) uniform initialization limit for a weight matrix with the
/// given fan-in and fan-out.
pub(crate) fn glorot_limit(fan_in: usize, fan_out: usize) -> f32 {
    (6.0 / (fan_in + fan_out) as f32).sqrt()
}
