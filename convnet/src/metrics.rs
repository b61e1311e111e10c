//! Metrics reported during training and evaluation.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::utils::argmax;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Fraction of examples whose most probable predicted class is the
    /// target class. Targets are one-hot rows.
    Accuracy,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
        }
    }

    pub fn compute(self, y: ArrayView2<'_, f32>, yh: ArrayView2<'_, f32>) -> f32 {
        assert_eq!(y.shape(), yh.shape());
        match self {
            Metric::Accuracy => {
                let n = y.nrows();
                if n == 0 {
                    return 0.0;
                }
                let mut num_good = 0;
                Zip::from(y.rows()).and(yh.rows()).for_each(|y, yh| {
                    if argmax(y) == argmax(yh) {
                        num_good += 1;
                    }
                });
                num_good as f32 / n as f32
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "accuracy" | "acc" => Ok(Metric::Accuracy),
            _ => bail!("unknown metric {s:?}"),
        }
    }
}
