use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use ndarray::prelude::*;
use ndarray::RemoveAxis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::callbacks::{BatchLogs, Callback, EpochLogs, History};
use crate::metrics::Metric;
use crate::optimizer::Sgd;
use crate::traits::{Layer, LayerSummary, Loss, Mode};

/// Batching for [`Model::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    pub batch_size: usize,
    pub epochs: usize,
    /// Reshuffle the training examples before each epoch.
    pub shuffle: bool,
    /// Seed for the shuffling.
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            batch_size: 32,
            epochs: 1,
            shuffle: true,
            seed: 0,
        }
    }
}

/// Data the model is evaluated on at the end of every epoch.
#[derive(Debug, Clone, Copy)]
pub struct ValidationData<'a, DI: Dimension> {
    pub x: ArrayView<'a, f32, DI>,
    pub y: ArrayView2<'a, f32>,
    pub batch_size: usize,
}

impl<'a, DI: Dimension> ValidationData<'a, DI> {
    pub fn new(x: ArrayView<'a, f32, DI>, y: ArrayView2<'a, f32>, batch_size: usize) -> Self {
        ValidationData { x, y, batch_size }
    }
}

/// Result of [`Model::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
}

/// A network compiled together with its parameters, loss function, optimizer
/// and metrics.
#[derive(Debug)]
pub struct Model<DI, N, L> {
    input_dimension: PhantomData<DI>,
    net: N,
    params: Array1<f32>,
    loss: L,
    optimizer: Sgd,
    metrics: Vec<Metric>,
}

fn check_samples<DI: Dimension>(x: &ArrayView<'_, f32, DI>, y: &ArrayView2<'_, f32>) -> Result<usize> {
    let n = x.len_of(Axis(0));
    ensure!(
        n == y.nrows(),
        "got {n} input samples but {} target samples",
        y.nrows()
    );
    ensure!(n > 0, "no samples");
    Ok(n)
}

impl<DI, N, L> Model<DI, N, L>
where
    DI: Dimension + RemoveAxis,
    N: Layer<DI, Output = Ix2>,
    L: Loss<Ix2>,
{
    /// Attach a loss, an optimizer and metrics to `net`, and initialize its
    /// parameters from `seed`.
    pub fn compile(net: N, loss: L, optimizer: Sgd, metrics: &[Metric], seed: u64) -> Self {
        let n = net.num_params();
        let mut params = Array1::zeros(n);
        let mut rng = StdRng::seed_from_u64(seed);
        net.init_params(params.view_mut(), &mut rng);
        debug!("compiled model with {n} parameters, optimizer {:?}", optimizer.config());
        Model {
            input_dimension: PhantomData,
            net,
            params,
            loss,
            optimizer,
            metrics: metrics.to_vec(),
        }
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> ArrayView1<'_, f32> {
        self.params.view()
    }

    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// One row per layer, for inputs of `input_shape`.
    pub fn summary(&self, input_shape: DI) -> Vec<LayerSummary> {
        let mut rows = vec![];
        self.net.summarize(input_shape, &mut rows);
        rows
    }

    fn forward(&self, x: ArrayView<'_, f32, DI>, mode: Mode) -> (Array2<f32>, Array2<f32>) {
        let input_shape = x.raw_dim();
        let mut tmp = Array2::zeros(self.net.hidden_activations_shape(input_shape.clone()));
        let mut yh = Array2::zeros(self.net.output_shape(input_shape));
        self.net
            .apply(self.params.view(), x, tmp.view_mut(), yh.view_mut(), mode);
        (tmp, yh)
    }

    fn compute_metrics(&self, y: ArrayView2<'_, f32>, yh: ArrayView2<'_, f32>) -> BTreeMap<String, f32> {
        self.metrics
            .iter()
            .map(|m| (m.name().to_string(), m.compute(y, yh)))
            .collect()
    }

    /// Run the model on an array of examples, `batch_size` at a time.
    pub fn predict(&self, x: ArrayView<'_, f32, DI>, batch_size: usize) -> Result<Array2<f32>> {
        ensure!(batch_size > 0, "batch size must be at least 1");
        let mut out = Array2::zeros(self.net.output_shape(x.raw_dim()));
        for (x, mut out) in x
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(out.axis_chunks_iter_mut(Axis(0), batch_size))
        {
            let (_, yh) = self.forward(x, Mode::Infer);
            out.assign(&yh);
        }
        Ok(out)
    }

    /// Loss and metrics on a labeled data set, computed `batch_size` examples
    /// at a time.
    pub fn evaluate(
        &self,
        x: ArrayView<'_, f32, DI>,
        y: ArrayView2<'_, f32>,
        batch_size: usize,
    ) -> Result<Evaluation> {
        let n = check_samples(&x, &y)?;
        ensure!(batch_size > 0, "batch size must be at least 1");

        let mut loss = 0.0;
        let mut metrics = BTreeMap::<String, f32>::new();
        for (x, y) in x
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(y.axis_chunks_iter(Axis(0), batch_size))
        {
            let size = y.nrows() as f32;
            let (_, yh) = self.forward(x, Mode::Infer);
            loss += self.loss.loss(y, yh.view()) * size;
            for (name, value) in self.compute_metrics(y, yh.view()) {
                *metrics.entry(name).or_default() += value * size;
            }
        }
        for value in metrics.values_mut() {
            *value /= n as f32;
        }
        Ok(Evaluation {
            loss: loss / n as f32,
            metrics,
        })
    }

    /// Compute the gradient on one batch and take one optimizer step.
    pub fn train_on_batch(&mut self, x: ArrayView<'_, f32, DI>, y: ArrayView2<'_, f32>) -> Result<BatchLogs> {
        let size = check_samples(&x, &y)?;
        let output_shape = self.net.output_shape(x.raw_dim());
        ensure!(
            output_shape == y.raw_dim(),
            "targets have shape {:?} but the model produces {:?}",
            y.shape(),
            output_shape.slice()
        );

        let (tmp, yh) = self.forward(x.view(), Mode::Train);
        let loss = self.loss.loss(y, yh.view());
        if !loss.is_finite() {
            warn!("loss is {loss}");
        }
        let metrics = self.compute_metrics(y, yh.view());

        let dyh = self.loss.deriv(y, yh.view());
        let mut dp = Array1::<f32>::zeros(self.params.len());
        let _ = self.net.derivatives(
            self.params.view(),
            x,
            tmp.view(),
            dyh.view(),
            dp.view_mut(),
        );
        self.optimizer.step(self.params.view_mut(), dp.view());

        Ok(BatchLogs { size, loss, metrics })
    }

    /// Train on in-memory arrays for `options.epochs` epochs.
    ///
    /// The last batch of each epoch may be smaller than `options.batch_size`.
    pub fn fit(
        &mut self,
        x: ArrayView<'_, f32, DI>,
        y: ArrayView2<'_, f32>,
        options: &FitOptions,
        validation: Option<ValidationData<'_, DI>>,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<History> {
        let n = check_samples(&x, &y).context("invalid training data")?;
        let batch_size = options.batch_size;
        ensure!(batch_size > 0, "batch size must be at least 1");
        let steps_per_epoch = (n + batch_size - 1) / batch_size;

        let shuffle = options.shuffle;
        let mut rng = StdRng::seed_from_u64(options.seed);
        let batches = (0..options.epochs).flat_map(move |_| {
            let mut order: Vec<usize> = (0..n).collect();
            if shuffle {
                order.shuffle(&mut rng);
            }
            let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();
            let (x, y) = (x.clone(), y.clone());
            chunks
                .into_iter()
                .map(move |idx| Ok::<_, anyhow::Error>((x.select(Axis(0), &idx), y.select(Axis(0), &idx))))
        });

        self.fit_generator(batches, steps_per_epoch, options.epochs, validation, callbacks)
    }

    /// Train on batches drawn from `batches`, `steps_per_epoch` of them per
    /// epoch.
    ///
    /// If the iterator runs out, the current epoch is finished with the
    /// batches it got and training stops there. Running out before the first
    /// batch, or any batch that is an `Err`, is an error.
    pub fn fit_generator<I>(
        &mut self,
        batches: I,
        steps_per_epoch: usize,
        epochs: usize,
        validation: Option<ValidationData<'_, DI>>,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<History>
    where
        I: IntoIterator<Item = Result<(Array<f32, DI>, Array2<f32>)>>,
    {
        ensure!(steps_per_epoch > 0, "steps per epoch must be at least 1");
        if let Some(v) = &validation {
            check_samples(&v.x, &v.y).context("invalid validation data")?;
            ensure!(v.batch_size > 0, "validation batch size must be at least 1");
        }

        let mut batches = batches.into_iter();
        let mut history = History::default();
        for cb in callbacks.iter_mut() {
            cb.on_train_begin(epochs, steps_per_epoch);
        }

        for epoch in 0..epochs {
            for cb in callbacks.iter_mut() {
                cb.on_epoch_begin(epoch);
            }
            let start = Instant::now();

            let mut seen = 0;
            let mut loss_total = 0.0;
            let mut metric_totals = BTreeMap::<String, f32>::new();
            let mut exhausted = false;
            for step in 0..steps_per_epoch {
                let Some(batch) = batches.next() else {
                    exhausted = true;
                    break;
                };
                let (x, y) = batch
                    .with_context(|| format!("failed to get batch {} of epoch {}", step + 1, epoch + 1))?;
                let logs = self
                    .train_on_batch(x.view(), y.view())
                    .with_context(|| format!("epoch {}, step {}", epoch + 1, step + 1))?;
                let size = logs.size as f32;
                seen += logs.size;
                loss_total += logs.loss * size;
                for (name, value) in &logs.metrics {
                    *metric_totals.entry(name.clone()).or_default() += value * size;
                }
                for cb in callbacks.iter_mut() {
                    cb.on_batch_end(step, &logs);
                }
            }

            if seen == 0 {
                if epoch == 0 {
                    bail!("no training batches: the data ran out before the first step");
                }
                warn!("ran out of training data; stopping after {epoch} epochs");
                break;
            }

            let (val_loss, val_metrics) = match &validation {
                Some(v) => {
                    let eval = self.evaluate(v.x.view(), v.y.view(), v.batch_size)?;
                    (Some(eval.loss), eval.metrics)
                }
                None => (None, BTreeMap::new()),
            };
            let elapsed = start.elapsed();
            let logs = EpochLogs {
                epoch,
                loss: loss_total / seen as f32,
                metrics: metric_totals
                    .into_iter()
                    .map(|(name, total)| (name, total / seen as f32))
                    .collect(),
                val_loss,
                val_metrics,
                learning_rate: self.optimizer.learning_rate(),
                elapsed_secs: elapsed.as_secs_f64(),
            };
            for cb in callbacks.iter_mut() {
                cb.on_epoch_end(&logs);
            }
            info!(
                "Epoch {}/{epochs} - {:.0}s - {}",
                epoch + 1,
                elapsed.as_secs_f64(),
                logs.display()
            );
            history.epochs.push(logs);

            if exhausted {
                warn!(
                    "ran out of training data after {} epochs; expected {} batches per epoch",
                    epoch + 1,
                    steps_per_epoch
                );
                break;
            }
        }

        for cb in callbacks.iter_mut() {
            cb.on_train_end(&history);
        }
        Ok(history)
    }
}

fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Render summary rows as a table, batch axis shown as `None`.
pub fn summary_table(rows: &[LayerSummary]) -> String {
    let rule = "=".repeat(65);
    let mut out = format!("{:<29}{:<26}{}\n{rule}\n", "Layer (type)", "Output Shape", "Param #");
    for row in rows {
        let dims: Vec<String> = std::iter::once("None".to_string())
            .chain(row.output_shape.iter().skip(1).map(|d| d.to_string()))
            .collect();
        let shape = format!("({})", dims.join(", "));
        out += &format!("{:<29}{:<26}{}\n", row.name, shape, with_thousands(row.num_params));
    }
    let total: usize = rows.iter().map(|r| r.num_params).sum();
    out += &format!("{rule}\nTotal params: {}\n", with_thousands(total));
    out
}
