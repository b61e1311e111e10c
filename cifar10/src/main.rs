use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::Logger;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use cifar10::architecture::{self, Syntax};
use cifar10::config::TrainingConfig;
use cifar10::dataset::{self, NUM_CLASSES};
use cifar10::training;
use convnet::{summary_table, BatchLogs, Callback, EpochLogs};

#[derive(Parser)]
#[command(about = "Train a convolutional network on the CIFAR-10 images", long_about = None)]
struct Options {
    /// Directory holding data_batch_1.bin .. data_batch_5.bin and test_batch.bin
    #[arg(long = "data-dir", value_name = "DIR", default_value = "cifar-10-batches-bin")]
    data_dir: PathBuf,

    /// Read training settings from this JSON file; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of passes over the training data
    #[arg(long)]
    epochs: Option<usize>,

    /// Number of examples per optimizer step
    #[arg(long = "batch-size", value_name = "N")]
    batch_size: Option<usize>,

    /// Train on the raw images instead of randomly shifted and flipped copies
    #[arg(long = "no-augmentation")]
    no_augmentation: bool,

    /// How the network is declared (the resulting network is the same)
    #[arg(long, value_enum)]
    syntax: Option<Syntax>,

    /// Train on the first N training images only
    #[arg(long = "train-samples", value_name = "N")]
    train_samples: Option<usize>,

    /// Validate on the first N test images only
    #[arg(long = "test-samples", value_name = "N")]
    test_samples: Option<usize>,

    /// Write the per-epoch history to FILE as JSON
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Write the effective configuration to FILE as JSON
    #[arg(long = "save-config", value_name = "FILE")]
    save_config: Option<PathBuf>,

    /// Print the layers of the network and exit
    #[arg(long)]
    summary: bool,
}

impl Options {
    fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.no_augmentation {
            config.data_augmentation = false;
        }
        if let Some(syntax) = self.syntax {
            config.syntax = syntax;
        }
        if self.train_samples.is_some() {
            config.train_samples = self.train_samples;
        }
        if self.test_samples.is_some() {
            config.test_samples = self.test_samples;
        }
        config.validate()?;
        Ok(config)
    }
}

/// One progress bar per epoch, advanced after every batch.
#[derive(Default)]
struct ProgressReporter {
    epochs: usize,
    steps_per_epoch: usize,
    bar: Option<ProgressBar>,
}

impl Callback for ProgressReporter {
    fn on_train_begin(&mut self, epochs: usize, steps_per_epoch: usize) {
        self.epochs = epochs;
        self.steps_per_epoch = steps_per_epoch;
    }

    fn on_epoch_begin(&mut self, epoch: usize) {
        let style = ProgressStyle::with_template(
            "{prefix} [{bar:30}] {pos}/{len} {elapsed_precise} (eta {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        let bar = ProgressBar::new(self.steps_per_epoch as u64)
            .with_style(style)
            .with_prefix(format!("Epoch {}/{}", epoch + 1, self.epochs));
        self.bar = Some(bar);
    }

    fn on_batch_end(&mut self, _step: usize, logs: &BatchLogs) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            let mut msg = format!("loss: {:.4}", logs.loss);
            for (name, value) in &logs.metrics {
                msg += &format!(" - {name}: {value:.4}");
            }
            bar.set_message(msg);
        }
    }

    fn on_epoch_end(&mut self, _logs: &EpochLogs) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn run(options: Options) -> Result<()> {
    let _logger = Logger::try_with_env_or_str("info")
        .context("invalid log specification")?
        .start()
        .context("failed to start logger")?;

    let config = options.training_config()?;
    if let Some(path) = &options.save_config {
        config.save(path)?;
        info!("saved configuration to {}", path.display());
    }

    if options.summary {
        let rows = architecture::summary(config.syntax, architecture::input_shape(), NUM_CLASSES);
        print!("{}", summary_table(&rows));
        return Ok(());
    }

    let data = dataset::load_data(&options.data_dir)?;
    let mut progress = ProgressReporter::default();
    let history = training::train(&config, &data, &mut [&mut progress])?;

    if let Some(last) = history.last() {
        info!("final: {}", last.display());
    }
    if let Some(path) = &options.history {
        let f = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, &history).context("failed to serialize history")?;
        writeln!(w)?;
        w.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote training history to {}", path.display());
    }
    Ok(())
}

fn main() {
    let options = Options::parse();

    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
