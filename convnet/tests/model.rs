//! Compile, train and evaluate small models end to end.

use anyhow::{anyhow, Result};
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use convnet::image::ImageDataGenerator;
use convnet::layers::{Conv2d, Dense, Dropout, Flatten, MaxPool2d, Relu, Softmax};
use convnet::loss::CategoricalCrossEntropy;
use convnet::utils::to_categorical;
use convnet::*;

/// Two classes of 6x6 single-channel images: bright on the left half or on
/// the right half.
fn halves(n: usize, seed: u64) -> (Array4<f32>, Array2<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Array::random_using((n, 6, 6, 1), Uniform::new(0.0, 0.2), &mut rng);
    let labels = Array1::from_shape_fn(n, |i| (i % 2) as u8);
    let x = Array4::from_shape_fn((n, 6, 6, 1), |(i, _, j, _)| {
        let bright = (j < 3) == (labels[i] == 0);
        noise[[i, 0, j, 0]] + if bright { 0.8 } else { 0.0 }
    });
    let y = to_categorical(labels.view(), 2).unwrap();
    (x, y)
}

fn sgd() -> Sgd {
    SgdConfig {
        learning_rate: 0.05,
        decay: 1e-6,
        momentum: 0.9,
        nesterov: true,
    }
    .init()
}

#[derive(Default)]
struct Recorder {
    begun: Option<(usize, usize)>,
    batches: usize,
    epochs: Vec<usize>,
    ended: bool,
}

impl Callback for Recorder {
    fn on_train_begin(&mut self, epochs: usize, steps_per_epoch: usize) {
        self.begun = Some((epochs, steps_per_epoch));
    }

    fn on_batch_end(&mut self, _step: usize, _logs: &BatchLogs) {
        self.batches += 1;
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs) {
        self.epochs.push(logs.epoch);
    }

    fn on_train_end(&mut self, _history: &History) {
        self.ended = true;
    }
}

#[test]
fn sequential_and_functional_agree() {
    let shape = Ix4(1, 6, 6, 1);
    let sequential = Sequential::new(shape)
        .add(Conv2d::same(4, 3))
        .add(Relu)
        .add(MaxPool2d::new(2))
        .add(Dropout::new(0.25))
        .add(Flatten)
        .add(Dense::new(2))
        .add(Softmax)
        .build();

    let inputs = input(shape);
    let x = Conv2d::same(4, 3).on(inputs);
    let x = Relu.on(x);
    let x = MaxPool2d::new(2).on(x);
    let x = Dropout::new(0.25).on(x);
    let x = Flatten.on(x);
    let x = Dense::new(2).on(x);
    let functional = Softmax.on(x).into_layer();

    let a = Model::compile(sequential, CategoricalCrossEntropy, sgd(), &[Metric::Accuracy], 3);
    let b = Model::compile(functional, CategoricalCrossEntropy, sgd(), &[Metric::Accuracy], 3);
    assert_eq!(a.summary(shape), b.summary(shape));
    assert_eq!(a.num_params(), 4 * 9 + 4 + 36 * 2 + 2);
    assert_eq!(a.params(), b.params());

    let (x, _) = halves(5, 1);
    let (pa, pb) = (a.predict(x.view(), 2).unwrap(), b.predict(x.view(), 5).unwrap());
    assert_eq!(pa.dim(), (5, 2));
    let diff = (&pa - &pb).fold(0.0f32, |m, d| m.max(d.abs()));
    assert!(diff < 1e-6, "{pa} != {pb}");
}

#[test]
fn summary_rows() {
    let net = Sequential::new(Ix4(1, 6, 6, 1))
        .add(Conv2d::valid(3, 3))
        .add(Relu)
        .add(Flatten)
        .add(Dense::new(2))
        .build();
    let model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[], 0);
    let rows = model.summary(Ix4(1, 6, 6, 1));
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["input", "conv2d", "relu", "flatten", "dense"]);
    assert_eq!(rows[1].output_shape, [1, 4, 4, 3]);
    assert_eq!(rows[1].num_params, 3 * 9 + 3);
    assert_eq!(rows[3].output_shape, [1, 48]);
    assert_eq!(rows[4].num_params, 48 * 2 + 2);
}

#[test]
fn fit_learns_separable_data() {
    let net = Sequential::new(Ix4(1, 6, 6, 1))
        .add(Conv2d::same(4, 3))
        .add(Relu)
        .add(MaxPool2d::new(2))
        .add(Flatten)
        .add(Dense::new(2))
        .add(Softmax)
        .build()
        .parallel(4);
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[Metric::Accuracy], 11);

    let (x, y) = halves(64, 2);
    let (x_val, y_val) = halves(16, 3);
    let before = model.evaluate(x_val.view(), y_val.view(), 8).unwrap();

    let mut recorder = Recorder::default();
    let options = FitOptions {
        batch_size: 10,
        epochs: 8,
        shuffle: true,
        seed: 5,
    };
    let history = model
        .fit(
            x.view(),
            y.view(),
            &options,
            Some(ValidationData::new(x_val.view(), y_val.view(), 8)),
            &mut [&mut recorder],
        )
        .unwrap();

    assert_eq!(history.epochs.len(), 8);
    assert_eq!(recorder.begun, Some((8, 7)));
    assert_eq!(recorder.batches, 8 * 7);
    assert_eq!(recorder.epochs, (0..8).collect::<Vec<_>>());
    assert!(recorder.ended);
    assert_eq!(model.optimizer().iterations(), 56);

    let last = history.last().unwrap();
    assert!(last.loss < history.epochs[0].loss, "{:?}", history.losses());
    assert!(last.val_loss.unwrap() < before.loss);
    assert!(last.val_metrics["accuracy"] >= 0.9, "{last:?}");

    let after = model.evaluate(x_val.view(), y_val.view(), 16).unwrap();
    assert!((after.loss - last.val_loss.unwrap()).abs() < 1e-4);
}

#[test]
fn fit_generator_with_augmentation() {
    let net = Sequential::new(Ix4(1, 6, 6, 1))
        .add(Flatten)
        .add(Dense::new(2))
        .add(Softmax)
        .build();
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[Metric::Accuracy], 0);

    let (x, y) = halves(10, 4);
    let datagen = ImageDataGenerator {
        height_shift_range: 0.2,
        vertical_flip: true,
        ..ImageDataGenerator::default()
    };
    let flow = datagen.flow(x.clone(), y.clone(), 4, true, 9).unwrap();
    let steps = flow.batches_per_pass();
    assert_eq!(steps, 3);

    let history = model
        .fit_generator(flow, steps, 3, Some(ValidationData::new(x.view(), y.view(), 10)), &mut [])
        .unwrap();
    assert_eq!(history.epochs.len(), 3);
    assert!(history.epochs.iter().all(|e| e.val_loss.is_some()));
}

#[test]
fn fit_generator_stops_when_data_runs_out() {
    let net = Sequential::new(Ix2(1, 3)).add(Dense::new(2)).add(Softmax).build();
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[], 0);

    let batch = (Array2::<f32>::ones((2, 3)), array![[1.0f32, 0.0], [0.0, 1.0]]);
    let batches: Vec<Result<_>> = vec![Ok(batch.clone()), Ok(batch.clone()), Ok(batch)];
    let history = model.fit_generator(batches, 2, 5, None, &mut []).unwrap();
    assert_eq!(history.epochs.len(), 2);
    assert_eq!(model.optimizer().iterations(), 3);
}

#[test]
fn fit_generator_without_batches_is_an_error() {
    let net = Sequential::new(Ix2(1, 3)).add(Dense::new(2)).add(Softmax).build();
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[], 0);

    let batches: Vec<Result<(Array2<f32>, Array2<f32>)>> = vec![];
    let err = model.fit_generator(batches, 2, 3, None, &mut []).unwrap_err();
    assert!(err.to_string().contains("no training batches"), "{err}");
    assert_eq!(model.optimizer().iterations(), 0);
}

#[test]
fn fit_generator_stops_on_failed_batch() {
    let net = Sequential::new(Ix2(1, 3)).add(Dense::new(2)).add(Softmax).build();
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[], 0);

    let batch = (Array2::<f32>::ones((2, 3)), array![[1.0f32, 0.0], [0.0, 1.0]]);
    let batches = vec![Ok(batch), Err(anyhow!("worker died"))];
    let mut recorder = Recorder::default();
    let err = model
        .fit_generator(batches, 2, 3, None, &mut [&mut recorder])
        .unwrap_err();
    assert!(format!("{err:#}").contains("worker died"), "{err:#}");
    assert_eq!(recorder.batches, 1);
    assert!(recorder.epochs.is_empty());
}

#[test]
fn learning_rate_decays() {
    let net = Sequential::new(Ix2(1, 3)).add(Dense::new(2)).add(Softmax).build();
    let config = SgdConfig {
        learning_rate: 0.1,
        decay: 0.5,
        ..SgdConfig::default()
    };
    let mut model = Model::compile(net, CategoricalCrossEntropy, config.init(), &[], 0);
    let x = Array2::<f32>::ones((4, 3));
    let y = array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
    let options = FitOptions {
        batch_size: 2,
        epochs: 1,
        shuffle: false,
        seed: 0,
    };
    let history = model.fit(x.view(), y.view(), &options, None, &mut []).unwrap();
    // Two steps taken: 0.1 / (1 + 0.5 * 2)
    assert!((history.epochs[0].learning_rate - 0.05).abs() < 1e-7);
}

#[test]
fn bad_inputs_are_errors() {
    let net = Sequential::new(Ix2(1, 3)).add(Dense::new(2)).add(Softmax).build();
    let mut model = Model::compile(net, CategoricalCrossEntropy, sgd(), &[], 0);
    let x = Array2::<f32>::zeros((4, 3));

    let err = model
        .evaluate(x.view(), Array2::zeros((3, 2)).view(), 2)
        .unwrap_err();
    assert!(err.to_string().contains("4 input samples but 3 target samples"));
    assert!(model.predict(x.view(), 0).is_err());

    let options = FitOptions {
        batch_size: 0,
        ..FitOptions::default()
    };
    assert!(model
        .fit(x.view(), Array2::zeros((4, 2)).view(), &options, None, &mut [])
        .is_err());

    assert!(model
        .train_on_batch(x.view(), Array2::zeros((4, 5)).view())
        .is_err());
    assert!(model
        .fit(
            Array2::zeros((0, 3)).view(),
            Array2::zeros((0, 2)).view(),
            &FitOptions::default(),
            None,
            &mut []
        )
        .is_err());
}
