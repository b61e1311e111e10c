//! Compile the network and train it on CIFAR-10.

use anyhow::Result;
use convnet::loss::CategoricalCrossEntropy;
use convnet::{Callback, FitOptions, History, Layer, Metric, Model, ValidationData};
use log::info;
use ndarray::prelude::*;

use crate::architecture::{self, Syntax};
use crate::config::TrainingConfig;
use crate::dataset::{Cifar10, NUM_CLASSES};

/// Train the network selected by `config.syntax`, validating on the test
/// split after every epoch.
pub fn train(
    config: &TrainingConfig,
    data: &Cifar10,
    callbacks: &mut [&mut dyn Callback],
) -> Result<History> {
    config.validate()?;
    let train = match config.train_samples {
        Some(n) => data.train.take(n),
        None => data.train.clone(),
    };
    let test = match config.test_samples {
        Some(n) => data.test.take(n),
        None => data.test.clone(),
    };
    info!("x_train shape: {:?}", train.images.shape());
    info!("{} train samples", train.len());
    info!("{} test samples", test.len());

    let x_train = train.x();
    let y_train = train.y()?;
    let x_test = test.x();
    let y_test = test.y()?;

    let shape = architecture::input_shape();
    match config.syntax {
        Syntax::Sequential => fit(
            architecture::sequential(shape, NUM_CLASSES),
            config,
            (x_train, y_train),
            (x_test.view(), y_test.view()),
            callbacks,
        ),
        Syntax::Functional => fit(
            architecture::functional(shape, NUM_CLASSES),
            config,
            (x_train, y_train),
            (x_test.view(), y_test.view()),
            callbacks,
        ),
    }
}

fn fit<'a, N>(
    net: N,
    config: &TrainingConfig,
    (x_train, y_train): (Array4<f32>, Array2<f32>),
    (x_test, y_test): (ArrayView4<'a, f32>, ArrayView2<'a, f32>),
    callbacks: &mut [&mut dyn Callback],
) -> Result<History>
where
    N: Layer<Ix4, Output = Ix2> + Sync,
{
    let mut model = Model::compile(
        net.parallel(config.parallel_chunk),
        CategoricalCrossEntropy,
        config.sgd().init(),
        &[Metric::Accuracy],
        config.seed,
    );
    info!("model has {} parameters", model.num_params());
    let validation = Some(ValidationData::new(x_test, y_test, config.batch_size));

    if !config.data_augmentation {
        info!("Not using data augmentation.");
        let options = FitOptions {
            batch_size: config.batch_size,
            epochs: config.epochs,
            shuffle: true,
            seed: config.seed,
        };
        model.fit(x_train.view(), y_train.view(), &options, validation, callbacks)
    } else {
        info!("Using real-time data augmentation.");
        let datagen = config.image_data_generator();
        let flow = datagen.flow(x_train, y_train, config.batch_size, true, config.seed)?;
        let steps_per_epoch = flow.batches_per_pass();
        model.fit_generator(flow, steps_per_epoch, config.epochs, validation, callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Split;
    use convnet::EpochLogs;

    fn tiny_data() -> Cifar10 {
        let split = |n: usize| Split {
            images: Array4::from_shape_fn((n, 32, 32, 3), |(i, y, x, c)| ((i * 7 + y * 3 + x + c * 50) % 256) as u8),
            labels: Array1::from_shape_fn(n, |i| (i % NUM_CLASSES) as u8),
        };
        Cifar10 {
            train: split(5),
            test: split(2),
        }
    }

    #[derive(Default)]
    struct Epochs(Vec<usize>);

    impl Callback for Epochs {
        fn on_epoch_end(&mut self, logs: &EpochLogs) {
            self.0.push(logs.epoch);
        }
    }

    #[test]
    fn one_epoch_each_way() {
        let data = tiny_data();
        for (syntax, data_augmentation) in [(Syntax::Sequential, false), (Syntax::Functional, true)] {
            let config = TrainingConfig {
                epochs: 1,
                batch_size: 2,
                parallel_chunk: 1,
                syntax,
                data_augmentation,
                train_samples: Some(4),
                ..TrainingConfig::default()
            };
            let mut epochs = Epochs::default();
            let history = train(&config, &data, &mut [&mut epochs]).unwrap();
            assert_eq!(epochs.0, vec![0]);
            let logs = history.last().unwrap();
            assert!(logs.loss.is_finite());
            assert!(logs.val_loss.unwrap().is_finite());
            assert!(logs.metrics.contains_key("accuracy"));
            assert!(logs.learning_rate < 0.01);
        }
    }

    #[test]
    fn invalid_config() {
        let config = TrainingConfig {
            parallel_chunk: 0,
            ..TrainingConfig::default()
        };
        assert!(train(&config, &tiny_data(), &mut []).is_err());
    }
}
