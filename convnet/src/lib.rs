//! A small convolutional network library built on `ndarray`.
//!
//! Networks are declared with [`Sequential`] or with the functional
//! [`input`]/[`Build::on`] syntax, compiled into a [`Model`] with a loss, an
//! [`Sgd`] optimizer and a list of [`Metric`]s, and trained with
//! [`Model::fit`] or [`Model::fit_generator`].

mod array_util;

mod traits;
pub use traits::{ActivationFn, Build, Layer, LayerSummary, Loss, Mode};

mod model;
pub use model::{summary_table, Evaluation, FitOptions, Model, ValidationData};

pub mod callbacks;
pub use callbacks::{BatchLogs, Callback, EpochLogs, History};

pub mod functional;
pub use functional::{input, Node};

mod sequential;
pub use sequential::Sequential;

pub mod image;
pub mod layers;
pub mod loss;
pub mod metrics;
pub use metrics::Metric;

pub mod optimizer;
pub use optimizer::{Sgd, SgdConfig};

pub mod utils;
