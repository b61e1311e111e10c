//! Hooks into the training loop, and the per-epoch record `fit` returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of one optimizer step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLogs {
    /// Number of examples in the batch.
    pub size: usize,
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
}

/// Summary of one epoch. Training loss and metrics are averaged over the
/// epoch's examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// Zero-based.
    pub epoch: usize,
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
    pub val_loss: Option<f32>,
    #[serde(default)]
    pub val_metrics: BTreeMap<String, f32>,
    /// Learning rate after the epoch's last step.
    pub learning_rate: f32,
    pub elapsed_secs: f64,
}

impl EpochLogs {
    /// One-line summary in the usual `loss: ... - accuracy: ...` form.
    pub fn display(&self) -> String {
        let mut s = format!("loss: {:.4}", self.loss);
        for (name, value) in &self.metrics {
            s += &format!(" - {name}: {value:.4}");
        }
        if let Some(val_loss) = self.val_loss {
            s += &format!(" - val_loss: {val_loss:.4}");
        }
        for (name, value) in &self.val_metrics {
            s += &format!(" - val_{name}: {value:.4}");
        }
        s
    }
}

/// Everything `fit` learned about the run, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochLogs>,
}

impl History {
    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    /// Training loss for each epoch.
    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }
}

/// Observer of the training loop. Every method has an empty default.
pub trait Callback {
    fn on_train_begin(&mut self, _epochs: usize, _steps_per_epoch: usize) {}
    fn on_epoch_begin(&mut self, _epoch: usize) {}
    fn on_batch_end(&mut self, _step: usize, _logs: &BatchLogs) {}
    fn on_epoch_end(&mut self, _logs: &EpochLogs) {}
    fn on_train_end(&mut self, _history: &History) {}
}
