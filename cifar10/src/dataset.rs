//! The CIFAR-10 data set, binary version.
//!
//! The distribution has five training files `data_batch_1.bin` ..
//! `data_batch_5.bin` and one `test_batch.bin`, each holding 10000 records of
//! one label byte followed by 3072 pixel bytes: the red plane, then green,
//! then blue, each 32x32 in row-major order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use convnet::utils::to_categorical;
use log::info;
use ndarray::prelude::*;
use rayon::prelude::*;

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;

pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

const PIXELS: usize = IMAGE_SIZE * IMAGE_SIZE * CHANNELS;
const RECORD_SIZE: usize = 1 + PIXELS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// Subdirectory the official archive unpacks to.
const ARCHIVE_DIR: &str = "cifar-10-batches-bin";

/// Images `(n, 32, 32, 3)`, channels last, with their class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub images: Array4<u8>,
    pub labels: Array1<u8>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The first `n` examples (all of them if there are fewer).
    pub fn take(&self, n: usize) -> Split {
        let n = n.min(self.len());
        Split {
            images: self.images.slice(s![..n, .., .., ..]).to_owned(),
            labels: self.labels.slice(s![..n]).to_owned(),
        }
    }

    pub fn concat(splits: &[Split]) -> Result<Split> {
        let images: Vec<_> = splits.iter().map(|s| s.images.view()).collect();
        let labels: Vec<_> = splits.iter().map(|s| s.labels.view()).collect();
        Ok(Split {
            images: ndarray::concatenate(Axis(0), &images).context("cannot concatenate images")?,
            labels: ndarray::concatenate(Axis(0), &labels).context("cannot concatenate labels")?,
        })
    }

    /// Pixels scaled into `[0, 1]`.
    pub fn x(&self) -> Array4<f32> {
        normalize(self.images.view())
    }

    /// One-hot labels.
    pub fn y(&self) -> Result<Array2<f32>> {
        to_categorical(self.labels.view(), NUM_CLASSES)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cifar10 {
    pub train: Split,
    pub test: Split,
}

pub fn normalize(images: ArrayView4<'_, u8>) -> Array4<f32> {
    images.mapv(|p| p as f32 / 255.0)
}

/// Decode the contents of one batch file.
pub fn parse_batch(bytes: &[u8]) -> Result<Split> {
    ensure!(
        bytes.len() % RECORD_SIZE == 0,
        "truncated record: file size {} is not a multiple of {RECORD_SIZE}",
        bytes.len()
    );
    let n = bytes.len() / RECORD_SIZE;
    let mut labels = Vec::with_capacity(n);
    let mut pixels = Vec::with_capacity(n * PIXELS);
    for (i, record) in bytes.chunks_exact(RECORD_SIZE).enumerate() {
        let label = record[0];
        if label as usize >= NUM_CLASSES {
            bail!("record {i} has label {label}, expected 0..{NUM_CLASSES}");
        }
        labels.push(label);
        pixels.extend_from_slice(&record[1..]);
    }

    let planar = Array4::from_shape_vec((n, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), pixels)
        .context("record size mismatch")?;
    let images = planar
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .into_owned();
    Ok(Split {
        images,
        labels: Array1::from(labels),
    })
}

pub fn read_batch(path: &Path) -> Result<Split> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_batch(&bytes).with_context(|| format!("invalid CIFAR-10 batch file {}", path.display()))
}

fn resolve_dir(dir: &Path) -> PathBuf {
    let nested = dir.join(ARCHIVE_DIR);
    if !dir.join(TEST_FILE).exists() && nested.join(TEST_FILE).exists() {
        nested
    } else {
        dir.to_path_buf()
    }
}

/// Load the training and test splits from `dir`, which holds the extracted
/// binary distribution (or the directory it was extracted into).
pub fn load_data(dir: &Path) -> Result<Cifar10> {
    let dir = resolve_dir(dir);
    let train = TRAIN_FILES
        .par_iter()
        .map(|name| read_batch(&dir.join(name)))
        .collect::<Result<Vec<Split>>>()?;
    let train = Split::concat(&train)?;
    let test = read_batch(&dir.join(TEST_FILE))?;
    info!(
        "loaded {} training and {} test images from {}",
        train.len(),
        test.len(),
        dir.display()
    );
    Ok(Cifar10 { train, test })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One record whose pixel at (row, col) in channel c is `c * 100 + row + col`,
    /// truncated to a byte.
    fn record(label: u8) -> Vec<u8> {
        let mut r = vec![label];
        for c in 0..CHANNELS {
            for row in 0..IMAGE_SIZE {
                for col in 0..IMAGE_SIZE {
                    r.push((c * 100 + row + col) as u8);
                }
            }
        }
        r
    }

    #[test]
    fn channels_move_last() {
        let bytes = [record(3), record(9)].concat();
        let split = parse_batch(&bytes).unwrap();
        assert_eq!(split.images.dim(), (2, 32, 32, 3));
        assert_eq!(split.labels, array![3, 9]);
        assert_eq!(split.images[[0, 0, 0, 0]], 0);
        assert_eq!(split.images[[0, 2, 5, 1]], 107);
        assert_eq!(split.images[[1, 31, 31, 2]], 262u32 as u8);
    }

    #[test]
    fn truncated_file() {
        let mut bytes = record(1);
        bytes.pop();
        let err = parse_batch(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn bad_label() {
        let err = parse_batch(&record(10)).unwrap_err();
        assert!(err.to_string().contains("label 10"), "{err}");
    }

    #[test]
    fn normalized_range() {
        let split = parse_batch(&record(0)).unwrap();
        let x = split.x();
        assert!(x.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert_eq!(x[[0, 2, 5, 1]], 107.0 / 255.0);
    }

    #[test]
    fn take_and_concat() {
        let a = parse_batch(&[record(1), record(2)].concat()).unwrap();
        let b = parse_batch(&record(3)).unwrap();
        let all = Split::concat(&[a, b]).unwrap();
        assert_eq!(all.labels, array![1, 2, 3]);
        assert_eq!(all.take(2).labels, array![1, 2]);
        assert_eq!(all.take(10).len(), 3);
        let y = all.y().unwrap();
        assert_eq!(y.dim(), (3, NUM_CLASSES));
        assert_eq!(y[[2, 3]], 1.0);
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join(ARCHIVE_DIR);
        fs::create_dir(&nested).unwrap();
        for (i, name) in TRAIN_FILES.iter().enumerate() {
            fs::write(nested.join(name), [record(i as u8), record(9)].concat()).unwrap();
        }
        fs::write(nested.join(TEST_FILE), record(7)).unwrap();

        let data = load_data(dir.path()).unwrap();
        assert_eq!(data.train.len(), 10);
        assert_eq!(data.train.labels, array![0, 9, 1, 9, 2, 9, 3, 9, 4, 9]);
        assert_eq!(data.test.labels, array![7]);
    }

    #[test]
    fn missing_file_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_data(dir.path()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("failed to read") && msg.contains("data_batch_"), "{msg}");
    }
}
