use std::path::PathBuf;

use thiserror::Error;

/// Why the input files could not be turned into a dataset.
///
/// Every variant renders a hint the user can act on; none of them lets the
/// pipeline continue with half-loaded data.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(
        "the file {path:?} was not found.\n\
         Make sure the data directory is laid out as:\n\
         \x20 <data-dir>/X_sample.npy\n\
         \x20 <data-dir>/sample_labels.csv"
    )]
    NotFound { path: PathBuf },

    #[error(
        "something went wrong while reading {path:?}: {reason}.\n\
         Are the files corrupted? Are they in the right format (.npy and .csv)?"
    )]
    Format { path: PathBuf, reason: String },

    #[error(
        "something went wrong while reading {path:?}: {source}.\n\
         Check that X_sample.npy and sample_labels.csv are available"
    )]
    Other {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} has no diagnosis column (expected one of {expected:?})")]
    MissingColumn { path: PathBuf, expected: Vec<String> },

    #[error("image tensor holds {images} samples but the label table has {labels} rows")]
    Misaligned { images: usize, labels: usize },
}

impl LoadError {
    /// Sorts an I/O failure into the not-found or generic category.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound { path },
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => LoadError::Format {
                path,
                reason: source.to_string(),
            },
            _ => LoadError::Other { path, source },
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("cannot reshape samples of {actual} values into {rows}x{cols}x{channels}")]
    Shape {
        actual: usize,
        rows: usize,
        cols: usize,
        channels: usize,
    },

    #[error("label code {label} does not fit into {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("found {found} distinct labels but the model is configured for {classes} classes (raise --nb-classes)")]
    TooManyLabels { found: usize, classes: usize },

    #[error("unknown label {0:?}")]
    UnknownLabel(String),

    #[error("split error: {0}")]
    Split(String),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_io_errors_are_categorised() {
        let missing = LoadError::from_io("data/X_sample.npy", std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert!(matches!(missing, LoadError::NotFound { .. }));
        assert!(missing.to_string().contains("sample_labels.csv"));

        let corrupt = LoadError::from_io("data/X_sample.npy", std::io::Error::new(ErrorKind::InvalidData, "bad magic"));
        assert!(matches!(corrupt, LoadError::Format { .. }));
        assert!(corrupt.to_string().contains("corrupted"));

        let other = LoadError::from_io("data/X_sample.npy", std::io::Error::new(ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(other, LoadError::Other { .. }));
        assert!(other.to_string().contains("available"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::TooManyLabels { found: 4, classes: 3 };
        assert!(err.to_string().contains("4 distinct labels"));
    }
}
