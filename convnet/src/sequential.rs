use ndarray::prelude::*;
use ndarray::RemoveAxis;

use crate::functional::{input, Node};
use crate::layers::{InputLayer, Sequence};
use crate::{Build, Layer};

/// A linear stack of layers, declared one at a time:
///
/// ```ignore
/// let net = Sequential::new(Ix4(1, 28, 28, 1))
///     .add(Flatten)
///     .add(Dense::new(10))
///     .add(Softmax)
///     .build();
/// ```
#[derive(Debug)]
pub struct Sequential<D: Dimension, L> {
    head: Node<D, L>,
}

impl<D: Dimension + RemoveAxis> Sequential<D, InputLayer<D>> {
    /// Start an empty stack for inputs of the given shape (mini-batch axis
    /// first).
    pub fn new(input_shape: D) -> Self {
        Sequential {
            head: input(input_shape),
        }
    }
}

impl<D, L> Sequential<D, L>
where
    D: Dimension,
    L: Layer<D>,
{
    /// Append a layer; its input shape is the output shape of the stack so far.
    pub fn add<B>(self, builder: B) -> Sequential<D, Sequence<L, B::Layer>>
    where
        B: Build<L::Output>,
    {
        Sequential {
            head: self.head.push(builder),
        }
    }

    pub fn input_shape(&self) -> D {
        self.head.input_shape()
    }

    pub fn output_shape(&self) -> L::Output {
        self.head.shape()
    }

    pub fn build(self) -> L {
        self.head.into_layer()
    }
}
