use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use convnet::image::ImageDataGenerator;
use convnet::SgdConfig;
use serde::{Deserialize, Serialize};

use crate::architecture::Syntax;

/// Everything that determines a training run. Missing fields in a JSON file
/// take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// Train through the augmenting image generator instead of on the raw
    /// images.
    pub data_augmentation: bool,
    pub learning_rate: f32,
    pub decay: f32,
    pub momentum: f32,
    pub nesterov: bool,
    /// Seeds parameter initialization and shuffling.
    pub seed: u64,
    pub syntax: Syntax,
    pub width_shift_range: f32,
    pub height_shift_range: f32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Examples per Rayon task.
    pub parallel_chunk: usize,
    /// Train on the first `n` training images only.
    pub train_samples: Option<usize>,
    /// Validate on the first `n` test images only.
    pub test_samples: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 32,
            epochs: 200,
            data_augmentation: true,
            learning_rate: 0.01,
            decay: 1e-6,
            momentum: 0.9,
            nesterov: true,
            seed: 42,
            syntax: Syntax::Sequential,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            horizontal_flip: true,
            vertical_flip: false,
            parallel_chunk: 8,
            train_samples: None,
            test_samples: None,
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let config: TrainingConfig = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("invalid configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self).context("failed to serialize configuration")?;
        writeln!(w)?;
        w.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(self.epochs > 0, "epochs must be at least 1");
        ensure!(self.parallel_chunk > 0, "parallel_chunk must be at least 1");
        ensure!(
            self.learning_rate > 0.0,
            "learning_rate must be positive, got {}",
            self.learning_rate
        );
        ensure!(self.decay >= 0.0, "decay must not be negative");
        ensure!(self.momentum >= 0.0, "momentum must not be negative");
        for (name, range) in [
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
        ] {
            ensure!(
                range.is_finite() && range >= 0.0,
                "{name} must be a finite, non-negative number, got {range}"
            );
        }
        ensure!(
            self.train_samples != Some(0) && self.test_samples != Some(0),
            "sample limits must be at least 1"
        );
        Ok(())
    }

    pub fn sgd(&self) -> SgdConfig {
        SgdConfig {
            learning_rate: self.learning_rate,
            decay: self.decay,
            momentum: self.momentum,
            nesterov: self.nesterov,
        }
    }

    pub fn image_data_generator(&self) -> ImageDataGenerator {
        ImageDataGenerator {
            width_shift_range: self.width_shift_range,
            height_shift_range: self.height_shift_range,
            horizontal_flip: self.horizontal_flip,
            vertical_flip: self.vertical_flip,
            ..ImageDataGenerator::default()
        }
    }
}
