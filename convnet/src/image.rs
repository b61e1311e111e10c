//! Real-time image data augmentation.
//!
//! [`ImageDataGenerator`] describes random transformations and normalization;
//! [`ImageDataGenerator::flow`] turns an in-memory data set into an endless
//! stream of augmented batches, prepared on a background thread while the
//! model trains.

use std::any::Any;
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{debug, error};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Added to standard deviations before dividing by them.
const STD_EPSILON: f32 = 1e-6;

/// Configuration of the augmentation pipeline. Images are `(height, width,
/// channels)`; batches are `(n, height, width, channels)`.
///
/// Everything is off by default; set the fields you need:
///
/// ```
/// use convnet::image::ImageDataGenerator;
///
/// let datagen = ImageDataGenerator {
///     width_shift_range: 0.1,
///     horizontal_flip: true,
///     ..ImageDataGenerator::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ImageDataGenerator {
    /// Subtract the per-channel mean of the data set (requires [`fit`](Self::fit)).
    pub featurewise_center: bool,
    /// Subtract each image's own mean.
    pub samplewise_center: bool,
    /// Divide by the per-channel standard deviation of the data set (requires
    /// [`fit`](Self::fit)).
    pub featurewise_std_normalization: bool,
    /// Divide each image by its own standard deviation.
    pub samplewise_std_normalization: bool,
    /// Maximum horizontal shift: a fraction of the width if below 1, else pixels.
    pub width_shift_range: f32,
    /// Maximum vertical shift: a fraction of the height if below 1, else pixels.
    pub height_shift_range: f32,
    /// Mirror left-right with probability 1/2.
    pub horizontal_flip: bool,
    /// Mirror top-bottom with probability 1/2.
    pub vertical_flip: bool,
    /// Number of prepared batches [`flow`](Self::flow) keeps queued.
    pub max_queue_size: usize,
    /// Per-channel statistics, set by [`fit`](Self::fit).
    pub stats: Option<FeatureStats>,
}

/// Per-channel mean and standard deviation of a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStats {
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl FeatureStats {
    pub fn mean(&self) -> ArrayView1<'_, f32> {
        self.mean.view()
    }

    pub fn std(&self) -> ArrayView1<'_, f32> {
        self.std.view()
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }
}

impl Default for ImageDataGenerator {
    fn default() -> Self {
        ImageDataGenerator {
            featurewise_center: false,
            samplewise_center: false,
            featurewise_std_normalization: false,
            samplewise_std_normalization: false,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            horizontal_flip: false,
            vertical_flip: false,
            max_queue_size: 10,
            stats: None,
        }
    }
}

/// One concrete geometric transformation.
///
/// Output pixel `(i, j)` is taken from input pixel `(i + ty, j + tx)` after
/// the flips are applied to `(i, j)`. Pixels shifted in from outside the
/// image repeat the nearest edge pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transform {
    pub tx: isize,
    pub ty: isize,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

fn random_shift<R: Rng>(range: f32, size: usize, rng: &mut R) -> isize {
    if range <= 0.0 {
        return 0;
    }
    let max = if range < 1.0 { range * size as f32 } else { range };
    rng.gen_range(-max..=max).round() as isize
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

impl ImageDataGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn featurewise(&self) -> bool {
        self.featurewise_center || self.featurewise_std_normalization
    }

    /// Compute the per-channel statistics used by the featurewise options.
    pub fn fit(&mut self, x: ArrayView4<'_, f32>) -> Result<()> {
        let (n, h, w, c) = x.dim();
        ensure!(n * h * w > 0, "cannot fit on an empty data set");
        let pixels = x.to_shape((n * h * w, c)).context("cannot reshape images")?;
        let mean = pixels.mean_axis(Axis(0)).context("cannot fit on an empty data set")?;
        let std = pixels.std_axis(Axis(0), 0.0);
        debug!("fitted per-channel mean {mean} and std {std}");
        self.stats = Some(FeatureStats { mean, std });
        Ok(())
    }

    /// Apply the normalization options to one image, in place.
    ///
    /// Featurewise options are skipped if [`fit`](Self::fit) hasn't been called.
    pub fn standardize(&self, mut image: ArrayViewMut3<'_, f32>) {
        if self.samplewise_center {
            let mean = image.mean().unwrap_or(0.0);
            image -= mean;
        }
        if self.samplewise_std_normalization {
            let std = image.std(0.0);
            image /= std + STD_EPSILON;
        }
        if let Some(stats) = &self.stats {
            if self.featurewise_center {
                image -= &stats.mean;
            }
            if self.featurewise_std_normalization {
                image /= &(&stats.std + STD_EPSILON);
            }
        }
    }

    /// Draw a random transformation for an image of the given height and width.
    pub fn random_transform_params<R: Rng>(&self, (h, w): (usize, usize), rng: &mut R) -> Transform {
        Transform {
            ty: random_shift(self.height_shift_range, h, rng),
            tx: random_shift(self.width_shift_range, w, rng),
            flip_horizontal: self.horizontal_flip && rng.gen_bool(0.5),
            flip_vertical: self.vertical_flip && rng.gen_bool(0.5),
        }
    }

    pub fn apply_transform(&self, image: ArrayView3<'_, f32>, t: &Transform) -> Array3<f32> {
        let (h, w, _) = image.dim();
        Array3::from_shape_fn(image.raw_dim(), |(i, j, c)| {
            let i = if t.flip_vertical { h - 1 - i } else { i };
            let j = if t.flip_horizontal { w - 1 - j } else { j };
            image[[
                clamp_index(i as isize + t.ty, h),
                clamp_index(j as isize + t.tx, w),
                c,
            ]]
        })
    }

    /// A randomly transformed copy of `image`.
    pub fn random_transform<R: Rng>(&self, image: ArrayView3<'_, f32>, rng: &mut R) -> Array3<f32> {
        let (h, w, _) = image.dim();
        let t = self.random_transform_params((h, w), rng);
        self.apply_transform(image, &t)
    }

    /// Endless stream of augmented `(x, y)` batches.
    ///
    /// Every pass over the data yields `ceil(n / batch_size)` batches, the last
    /// one possibly smaller. The batches are prepared by a background thread
    /// that stops when the returned [`Flow`] is dropped.
    pub fn flow(
        &self,
        x: Array4<f32>,
        y: Array2<f32>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Flow> {
        let n = x.len_of(Axis(0));
        ensure!(
            n == y.nrows(),
            "got {n} images but {} targets",
            y.nrows()
        );
        ensure!(n > 0, "no images");
        ensure!(batch_size > 0, "batch size must be at least 1");
        for (name, range) in [
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
        ] {
            ensure!(
                range.is_finite() && range >= 0.0,
                "{name} must be a finite, non-negative number, got {range}"
            );
        }
        let channels = x.len_of(Axis(3));
        if self.featurewise() {
            match &self.stats {
                None => bail!("featurewise normalization is enabled, but the generator hasn't been fit to any data"),
                Some(stats) => ensure!(
                    stats.channels() == channels,
                    "generator was fit to images with {} channels, got {channels}",
                    stats.channels()
                ),
            }
        }

        let generator = self.clone();
        let (sender, receiver) = mpsc::sync_channel(self.max_queue_size);
        let worker = thread::Builder::new()
            .name("image-data-generator".to_string())
            .spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let (_, h, w, c) = x.dim();
                let mut order: Vec<usize> = (0..n).collect();
                loop {
                    if shuffle {
                        order.shuffle(&mut rng);
                    }
                    for chunk in order.chunks(batch_size) {
                        let mut bx = Array4::zeros((chunk.len(), h, w, c));
                        for (mut dst, &i) in bx.outer_iter_mut().zip(chunk) {
                            let mut image = generator.random_transform(x.index_axis(Axis(0), i), &mut rng);
                            generator.standardize(image.view_mut());
                            dst.assign(&image);
                        }
                        let by = y.select(Axis(0), chunk);
                        if sender.send((bx, by)).is_err() {
                            // The Flow was dropped.
                            return;
                        }
                    }
                }
            })
            .context("failed to spawn image augmentation thread")?;
        debug!("started augmentation of {n} images in batches of {batch_size}");

        Ok(Flow {
            receiver: Some(receiver),
            worker: Some(worker),
            batches_per_pass: (n + batch_size - 1) / batch_size,
        })
    }
}

/// Iterator over augmented batches. See [`ImageDataGenerator::flow`].
///
/// If the worker thread dies, the next call yields the error once and the
/// iterator ends.
#[derive(Debug)]
pub struct Flow {
    receiver: Option<mpsc::Receiver<(Array4<f32>, Array2<f32>)>>,
    worker: Option<thread::JoinHandle<()>>,
    batches_per_pass: usize,
}

impl Flow {
    /// Number of batches in one pass over the data.
    pub fn batches_per_pass(&self) -> usize {
        self.batches_per_pass
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(&msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown cause"
    }
}

impl Iterator for Flow {
    type Item = Result<(Array4<f32>, Array2<f32>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let received = self.receiver.as_ref()?.recv();
        match received {
            Ok(batch) => Some(Ok(batch)),
            Err(mpsc::RecvError) => {
                self.receiver = None;
                match self.worker.take()?.join() {
                    Ok(()) => None,
                    Err(payload) => Some(Err(anyhow!(
                        "image augmentation thread panicked: {}",
                        panic_message(&*payload)
                    ))),
                }
            }
        }
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        // Disconnect first so a worker blocked on a full queue wakes up.
        drop(self.receiver.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("image augmentation thread panicked");
            }
        }
    }
}
