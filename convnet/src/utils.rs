//! Label encoding helpers.

use anyhow::{bail, Result};
use ndarray::prelude::*;

/// Convert a vector of class indices to a one-hot matrix with `num_classes`
/// columns.
pub fn to_categorical<T>(labels: ArrayView1<'_, T>, num_classes: usize) -> Result<Array2<f32>>
where
    T: Copy + Into<usize>,
{
    let mut out = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        let class: usize = label.into();
        if class >= num_classes {
            bail!("label {class} at index {i} is out of range for {num_classes} classes");
        }
        out[[i, class]] = 1.0;
    }
    Ok(out)
}

/// Index of the largest element (the first one, on ties). `None` if `v` is
/// empty.
pub fn argmax(v: ArrayView1<'_, f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &x) in v.iter().enumerate() {
        match best {
            Some((_, b)) if x <= b => {}
            _ => best = Some((i, x)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot() {
        let labels = array![2u8, 0, 1];
        let y = to_categorical(labels.view(), 3).unwrap();
        assert_eq!(y, array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        for row in y.rows() {
            assert_eq!(row.sum(), 1.0);
        }
    }

    #[test]
    fn label_out_of_range() {
        let labels = array![1usize, 10];
        let err = to_categorical(labels.view(), 10).unwrap_err();
        assert!(err.to_string().contains("label 10 at index 1"));
    }

    #[test]
    fn argmax_first_on_ties() {
        assert_eq!(argmax(array![0.1, 0.7, 0.7, 0.2].view()), Some(1));
        assert_eq!(argmax(ArrayView1::from(&[])), None);
    }
}
