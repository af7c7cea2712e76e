//! Reading the image tensor and label table from the data directory.

use std::path::Path;

use ndarray::{Array2, ArrayD};
use ndarray_npy::{read_npy, ReadNpyError, ReadableElement};
use tracing::info;

use crate::error::LoadError;

pub const IMAGES_FILE: &str = "X_sample.npy";
pub const LABELS_FILE: &str = "sample_labels.csv";

/// Names the diagnosis column may go by in the label table
pub const LABEL_COLUMNS: [&str; 2] = ["Finding_Labels", "Finding Labels"];

/// Raw pixels, one row per sample, with the diagnosis of every row
#[derive(Debug, Clone)]
pub struct Dataset {
    pub images: Array2<f32>,
    pub labels: Vec<String>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Values per sample in the image tensor
    pub fn sample_len(&self) -> usize {
        self.images.ncols()
    }
}

pub fn load_dataset(dir: &Path) -> Result<Dataset, LoadError> {
    let images = load_images(&dir.join(IMAGES_FILE))?;
    let labels = load_labels(&dir.join(LABELS_FILE))?;

    if images.nrows() != labels.len() {
        return Err(LoadError::Misaligned {
            images: images.nrows(),
            labels: labels.len(),
        });
    }

    info!(samples = labels.len(), values_per_sample = images.ncols(), "dataset loaded");
    Ok(Dataset { images, labels })
}

macro_rules! read_first_matching {
    ($path:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Some(array) = read_as::<$ty>($path)? {
                return samples_by_row($path, array, |v: $ty| v as f32);
            }
        )+
    };
}

/// Reads an `.npy` tensor of any numeric dtype and flattens every sample.
///
/// The first axis is the sample axis; a one-dimensional tensor holds one
/// value per sample.
pub fn load_images(path: &Path) -> Result<Array2<f32>, LoadError> {
    read_first_matching!(path, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

    Err(LoadError::Format {
        path: path.into(),
        reason: "unsupported element type".to_string(),
    })
}

/// `None` when the file holds some other element type
fn read_as<A: ReadableElement>(path: &Path) -> Result<Option<ArrayD<A>>, LoadError> {
    match read_npy::<_, ArrayD<A>>(path) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(ReadNpyError::Io(e)) => Err(LoadError::from_io(path, e)),
        Err(e) => Err(LoadError::Format {
            path: path.into(),
            reason: e.to_string(),
        }),
    }
}

fn samples_by_row<A: Copy>(path: &Path, array: ArrayD<A>, cast: impl Fn(A) -> f32) -> Result<Array2<f32>, LoadError> {
    let Some((&samples, rest)) = array.shape().split_first() else {
        return Err(LoadError::Format {
            path: path.into(),
            reason: "the image tensor is a scalar".to_string(),
        });
    };
    let per_sample = rest.iter().product::<usize>();
    info!(shape = ?array.shape(), "image tensor read");

    // iter() walks in logical order, so Fortran-ordered files flatten correctly too
    let values: Vec<f32> = array.iter().map(|&v| cast(v)).collect();
    Array2::from_shape_vec((samples, per_sample), values).map_err(|e| LoadError::Format {
        path: path.into(),
        reason: e.to_string(),
    })
}

/// Reads the diagnosis column of the label table, one label per row
pub fn load_labels(path: &Path) -> Result<Vec<String>, LoadError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?;
    let column = headers
        .iter()
        .position(|h| LABEL_COLUMNS.contains(&h.trim()))
        .ok_or_else(|| LoadError::MissingColumn {
            path: path.into(),
            expected: LABEL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        })?;

    let mut labels = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let label = record.get(column).ok_or_else(|| LoadError::Format {
            path: path.into(),
            reason: format!("row {} has no diagnosis", labels.len() + 1),
        })?;
        labels.push(label.to_string());
    }

    info!(rows = labels.len(), "label table read");
    Ok(labels)
}

fn csv_error(path: &Path, error: csv::Error) -> LoadError {
    let reason = error.to_string();
    match error.into_kind() {
        csv::ErrorKind::Io(e) => LoadError::from_io(path, e),
        _ => LoadError::Format {
            path: path.into(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};
    use ndarray_npy::write_npy;
    use std::fs;

    fn write_labels(dir: &Path, header: &str, rows: &[&str]) {
        let mut body = format!("Image_Index,{header},Patient_Age\n");
        for (i, row) in rows.iter().enumerate() {
            body.push_str(&format!("{i:08}_000.png,{row},42\n"));
        }
        fs::write(dir.join(LABELS_FILE), body).unwrap();
    }

    #[test]
    fn test_loads_u8_images_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let images = Array3::<u8>::from_shape_fn((3, 2, 2), |(n, r, c)| (n * 4 + r * 2 + c) as u8);
        write_npy(dir.path().join(IMAGES_FILE), &images).unwrap();
        write_labels(dir.path(), "Finding_Labels", &["Effusion", "No Finding", "Effusion"]);

        let dataset = load_dataset(dir.path()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.sample_len(), 4);
        assert_eq!(dataset.images.row(2).to_vec(), vec![8.0, 9.0, 10.0, 11.0]);
        assert_eq!(dataset.labels[1], "No Finding");
    }

    #[test]
    fn test_loads_float_images_and_spaced_header() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join(IMAGES_FILE), &array![[0.5f64, 255.0], [1.0, 2.0]]).unwrap();
        write_labels(dir.path(), "Finding Labels", &["A", "B"]);

        let dataset = load_dataset(dir.path()).unwrap();
        assert_eq!(dataset.images, array![[0.5f32, 255.0], [1.0, 2.0]]);
    }

    #[test]
    fn test_missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::NotFound { ref path } if path.ends_with(IMAGES_FILE)));

        write_npy(dir.path().join(IMAGES_FILE), &array![[1u8]]).unwrap();
        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::NotFound { ref path } if path.ends_with(LABELS_FILE)));
    }

    #[test]
    fn test_corrupt_tensor_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(IMAGES_FILE), "this is definitely not a numpy file\n").unwrap();
        write_labels(dir.path(), "Finding_Labels", &["A"]);

        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::Format { .. }));
    }

    #[test]
    fn test_label_table_without_diagnosis_column() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join(IMAGES_FILE), &array![[1u8]]).unwrap();
        write_labels(dir.path(), "Diagnosis", &["A"]);

        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { .. }));
    }

    #[test]
    fn test_counts_must_align() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join(IMAGES_FILE), &array![[1u8], [2]]).unwrap();
        write_labels(dir.path(), "Finding_Labels", &["A", "B", "C"]);

        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::Misaligned { images: 2, labels: 3 }));
    }
}
