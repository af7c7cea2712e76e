use std::collections::BTreeSet;

use ndarray::{Array2, Array4, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// Maps label strings to class codes `0..K` in sorted label order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        LabelEncoder {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> Result<(Self, Vec<usize>)> {
        let encoder = Self::fit(labels);
        let codes = encoder.transform(labels)?;
        Ok((encoder, codes))
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|l| self.code(l.as_ref()).ok_or_else(|| Error::UnknownLabel(l.as_ref().to_string())))
            .collect()
    }

    pub fn inverse_transform(&self, codes: &[usize]) -> Result<Vec<String>> {
        codes
            .iter()
            .map(|&c| {
                self.classes.get(c).cloned().ok_or(Error::LabelOutOfRange {
                    label: c,
                    classes: self.classes.len(),
                })
            })
            .collect()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn code(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }
}

/// Fails when the labels need more output units than the model has
pub fn check_class_count(distinct: usize, classes: usize) -> Result<()> {
    if distinct > classes {
        return Err(Error::TooManyLabels {
            found: distinct,
            classes,
        });
    }
    Ok(())
}

/// Two disjoint partitions of the samples
#[derive(Debug, Clone)]
pub struct Split {
    pub x_train: Array2<f32>,
    pub x_test: Array2<f32>,
    pub y_train: Vec<usize>,
    pub y_test: Vec<usize>,
}

/// Shuffles the samples and puts `ceil(test_fraction * n)` of them in the
/// test partition.
pub fn train_test_split(
    images: ArrayView2<f32>,
    labels: &[usize],
    test_fraction: f64,
    rng: &mut impl Rng,
) -> Result<Split> {
    let n = images.nrows();
    if n != labels.len() {
        return Err(Error::Split(format!("{n} images but {} labels", labels.len())));
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(Error::Split(format!("test fraction {test_fraction} is outside (0, 1)")));
    }

    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test >= n {
        return Err(Error::Split(format!(
            "a test fraction of {test_fraction} leaves no training samples out of {n}"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let (test, train) = order.split_at(n_test);

    Ok(Split {
        x_train: images.select(Axis(0), train),
        x_test: images.select(Axis(0), test),
        y_train: train.iter().map(|&i| labels[i]).collect(),
        y_test: test.iter().map(|&i| labels[i]).collect(),
    })
}

/// Row-per-sample pixels to (samples, rows, cols, channels)
pub fn reshape_images(flat: Array2<f32>, rows: usize, cols: usize, channels: usize) -> Result<Array4<f32>> {
    let (samples, actual) = flat.dim();
    if actual != rows * cols * channels {
        return Err(Error::Shape {
            actual,
            rows,
            cols,
            channels,
        });
    }
    let flat = if flat.is_standard_layout() {
        flat
    } else {
        flat.as_standard_layout().into_owned()
    };
    flat.into_shape_with_order((samples, rows, cols, channels))
        .map_err(|_| Error::Shape {
            actual,
            rows,
            cols,
            channels,
        })
}

pub fn flatten_images(images: &Array4<f32>) -> Array2<f32> {
    let (samples, rows, cols, channels) = images.dim();
    Array2::from_shape_fn((samples, rows * cols * channels), |(n, i)| {
        images[[n, i / (cols * channels), (i / channels) % cols, i % channels]]
    })
}

/// Scales 8-bit intensities into [0, 1]
pub fn normalize(images: &mut Array4<f32>) {
    images.mapv_inplace(|v| v / 255.0);
}

pub fn to_categorical(codes: &[usize], classes: usize) -> Result<Array2<f32>> {
    let mut one_hot = Array2::zeros((codes.len(), classes));
    for (row, &code) in codes.iter().enumerate() {
        if code >= classes {
            return Err(Error::LabelOutOfRange { label: code, classes });
        }
        one_hot[[row, code]] = 1.0;
    }
    Ok(one_hot)
}
