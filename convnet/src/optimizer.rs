//! Stochastic gradient descent.

use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Hyperparameters of [`Sgd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub learning_rate: f32,
    /// Time-based decay: the rate at step `t` is `learning_rate / (1 + decay * t)`.
    pub decay: f32,
    pub momentum: f32,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig {
            learning_rate: 0.01,
            decay: 0.0,
            momentum: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    pub fn init(self) -> Sgd {
        Sgd::new(self)
    }
}

/// SGD with optional momentum, Nesterov momentum and learning rate decay.
///
/// Each call to [`step`](Sgd::step) does, elementwise:
///
/// ```text
/// lr = learning_rate / (1 + decay * t)
/// v  = momentum * v - lr * g
/// p += momentum * v - lr * g    (nesterov)
/// p += v                        (otherwise)
/// ```
///
/// then increments `t`.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    iterations: u64,
    velocity: Option<Array1<f32>>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        assert!(
            config.learning_rate >= 0.0 && config.decay >= 0.0 && config.momentum >= 0.0,
            "SGD hyperparameters must be non-negative: {config:?}"
        );
        Sgd {
            config,
            iterations: 0,
            velocity: None,
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Number of updates applied so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Learning rate the next step will use.
    pub fn learning_rate(&self) -> f32 {
        self.config.learning_rate / (1.0 + self.config.decay * self.iterations as f32)
    }

    /// Apply one update to `params` given the gradient `grads`.
    pub fn step(&mut self, mut params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>) {
        assert_eq!(params.len(), grads.len());
        let lr = self.learning_rate();
        let SgdConfig {
            momentum, nesterov, ..
        } = self.config;

        if momentum == 0.0 {
            params.scaled_add(-lr, &grads);
        } else {
            let v = self
                .velocity
                .get_or_insert_with(|| Array1::zeros(grads.len()));
            Zip::from(&mut params)
                .and(v)
                .and(&grads)
                .for_each(|p, v, &g| {
                    *v = momentum * *v - lr * g;
                    if nesterov {
                        *p += momentum * *v - lr * g;
                    } else {
                        *p += *v;
                    }
                });
        }
        self.iterations += 1;
    }
}
