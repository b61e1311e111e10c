//! The network: two blocks of two 3x3 convolutions with max pooling and
//! dropout, then a dense classifier.
//!
//! It is declared twice, once with [`Sequential`] and once in the functional
//! style. Both declarations build the same layers.

use clap::ValueEnum;
use convnet::layers::{Conv2d, Dense, Dropout, Flatten, MaxPool2d, Relu, Softmax};
use convnet::{input, Build, Layer, LayerSummary, Node, Sequential};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{CHANNELS, IMAGE_SIZE};

/// Which declaration to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Sequential,
    Functional,
}

/// Shape of one CIFAR-10 image with the batch axis in front.
pub fn input_shape() -> Ix4 {
    Ix4(1, IMAGE_SIZE, IMAGE_SIZE, CHANNELS)
}

pub fn sequential(input_shape: Ix4, num_classes: usize) -> impl Layer<Ix4, Output = Ix2> + Sync {
    Sequential::new(input_shape)
        .add(Conv2d::same(32, 3))
        .add(Relu)
        .add(Conv2d::valid(32, 3))
        .add(Relu)
        .add(MaxPool2d::new(2))
        .add(Dropout::new(0.25))
        .add(Conv2d::same(64, 3))
        .add(Relu)
        .add(Conv2d::valid(64, 3))
        .add(Relu)
        .add(MaxPool2d::new(2))
        .add(Dropout::new(0.25))
        .add(Flatten)
        .add(Dense::new(512))
        .add(Relu)
        .add(Dropout::new(0.5))
        .add(Dense::new(num_classes))
        .add(Softmax)
        .build()
}

/// Two convolutions, the first keeping the image size and the second
/// shrinking it by 2, then pooling and dropout.
fn conv_block<L>(x: Node<Ix4, L>, filters: usize) -> Node<Ix4, impl Layer<Ix4, Output = Ix4> + Sync>
where
    L: Layer<Ix4, Output = Ix4> + Sync,
{
    let x = Conv2d::same(filters, 3).on(x);
    let x = Relu.on(x);
    let x = Conv2d::valid(filters, 3).on(x);
    let x = Relu.on(x);
    let x = MaxPool2d::new(2).on(x);
    Dropout::new(0.25).on(x)
}

pub fn functional(input_shape: Ix4, num_classes: usize) -> impl Layer<Ix4, Output = Ix2> + Sync {
    let inputs = input(input_shape);
    let x = conv_block(inputs, 32);
    let x = conv_block(x, 64);
    let x = Flatten.on(x);
    let x = Dense::new(512).on(x);
    let x = Relu.on(x);
    let x = Dropout::new(0.5).on(x);
    let x = Dense::new(num_classes).on(x);
    Softmax.on(x).into_layer()
}

/// Summary rows for the network declared with `syntax`.
pub fn summary(syntax: Syntax, input_shape: Ix4, num_classes: usize) -> Vec<LayerSummary> {
    let mut rows = vec![];
    match syntax {
        Syntax::Sequential => sequential(input_shape, num_classes).summarize(input_shape, &mut rows),
        Syntax::Functional => functional(input_shape, num_classes).summarize(input_shape, &mut rows),
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::NUM_CLASSES;

    #[test]
    fn both_syntaxes_match() {
        let shape = input_shape();
        let a = sequential(shape, NUM_CLASSES);
        let b = functional(shape, NUM_CLASSES);
        assert_eq!(a.num_params(), 1_250_858);
        assert_eq!(b.num_params(), 1_250_858);
        assert_eq!(a.output_shape(Ix4(7, 32, 32, 3)), Ix2(7, 10));
        assert_eq!(
            summary(Syntax::Sequential, shape, NUM_CLASSES),
            summary(Syntax::Functional, shape, NUM_CLASSES)
        );
    }

    #[test]
    fn both_syntaxes_predict_alike() {
        use convnet::loss::CategoricalCrossEntropy;
        use convnet::{Metric, Model, SgdConfig};

        let shape = input_shape();
        let a = Model::compile(
            sequential(shape, NUM_CLASSES),
            CategoricalCrossEntropy,
            SgdConfig::default().init(),
            &[Metric::Accuracy],
            42,
        );
        let b = Model::compile(
            functional(shape, NUM_CLASSES),
            CategoricalCrossEntropy,
            SgdConfig::default().init(),
            &[Metric::Accuracy],
            42,
        );
        assert_eq!(a.params(), b.params());

        let x = Array4::from_shape_fn((2, 32, 32, 3), |(n, i, j, c)| {
            ((n * 31 + i * 7 + j * 3 + c) % 17) as f32 / 16.0
        });
        let pa = a.predict(x.view(), 2).unwrap();
        let pb = b.predict(x.view(), 1).unwrap();
        assert_eq!(pa.dim(), (2, NUM_CLASSES));
        let diff = (&pa - &pb).fold(0.0f32, |m, d| m.max(d.abs()));
        assert!(diff < 1e-6, "{pa} != {pb}");
        for row in pa.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn layer_shapes() {
        let rows = summary(Syntax::Functional, input_shape(), NUM_CLASSES);
        let expected: &[(&str, &[usize], usize)] = &[
            ("input", &[1, 32, 32, 3], 0),
            ("conv2d", &[1, 32, 32, 32], 896),
            ("relu", &[1, 32, 32, 32], 0),
            ("conv2d", &[1, 30, 30, 32], 9248),
            ("relu", &[1, 30, 30, 32], 0),
            ("max_pooling2d", &[1, 15, 15, 32], 0),
            ("dropout", &[1, 15, 15, 32], 0),
            ("conv2d", &[1, 15, 15, 64], 18496),
            ("relu", &[1, 15, 15, 64], 0),
            ("conv2d", &[1, 13, 13, 64], 36928),
            ("relu", &[1, 13, 13, 64], 0),
            ("max_pooling2d", &[1, 6, 6, 64], 0),
            ("dropout", &[1, 6, 6, 64], 0),
            ("flatten", &[1, 2304], 0),
            ("dense", &[1, 512], 1_180_160),
            ("relu", &[1, 512], 0),
            ("dropout", &[1, 512], 0),
            ("dense", &[1, 10], 5130),
            ("softmax", &[1, 10], 0),
        ];
        assert_eq!(rows.len(), expected.len());
        for (row, &(name, shape, params)) in rows.iter().zip(expected) {
            assert_eq!(row.name, name);
            assert_eq!(row.output_shape, shape);
            assert_eq!(row.num_params, params, "{name}");
        }
    }

    #[test]
    fn syntax_names() {
        assert_eq!(serde_json::to_string(&Syntax::Functional).unwrap(), "\"functional\"");
        assert_eq!(
            Syntax::from_str("sequential", true).unwrap(),
            Syntax::Sequential
        );
    }
}
