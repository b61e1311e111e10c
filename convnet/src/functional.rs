//! Functional model declaration.
//!
//! ```ignore
//! let inputs = input(Ix4(1, 32, 32, 3));
//! let x = Conv2d::same(32, 3).on(inputs);
//! let x = Relu.on(x);
//! let net = x.into_layer();
//! ```
//!
//! A [`Node`] stands for the tensor produced at some point in the network. It
//! carries the chain of layers from the model input up to that point, so each
//! `on` call can infer its layer's shape and extend the chain.

use ndarray::prelude::*;
use ndarray::RemoveAxis;

use crate::layers::{InputLayer, Sequence};
use crate::{Build, Layer};

/// Symbolic tensor: the output of `layer` when fed inputs of `input_shape`.
#[derive(Debug)]
pub struct Node<DI: Dimension, L> {
    input_shape: DI,
    layer: L,
}

/// The model input. `shape` includes the mini-batch axis; its length there
/// doesn't matter.
pub fn input<D: Dimension + RemoveAxis>(shape: D) -> Node<D, InputLayer<D>> {
    Node {
        input_shape: shape,
        layer: InputLayer::new(),
    }
}

impl<DI, L> Node<DI, L>
where
    DI: Dimension,
    L: Layer<DI>,
{
    /// Shape of the tensor this node stands for.
    pub fn shape(&self) -> L::Output {
        self.layer.output_shape(self.input_shape.clone())
    }

    /// Shape of the model input this node was derived from.
    pub fn input_shape(&self) -> DI {
        self.input_shape.clone()
    }

    pub(crate) fn push<B>(self, builder: B) -> Node<DI, Sequence<L, B::Layer>>
    where
        B: Build<L::Output>,
    {
        let next = builder.build(self.shape());
        Node {
            input_shape: self.input_shape,
            layer: Sequence::new::<DI>(self.layer, next),
        }
    }

    /// Finish the declaration: the network mapping the model input to this node.
    pub fn into_layer(self) -> L {
        self.layer
    }
}
