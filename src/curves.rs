//! Training curves and the model graph, written to a log directory that
//! outlives the run.
//!
//! Nothing here is allowed to fail a run: every write error is logged as a
//! warning and the logger carries on without its output.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const METRICS_FILE: &str = "metrics.csv";
pub const GRAPH_FILE: &str = "graph.json";

#[derive(Debug)]
pub struct CurveLogger {
    dir: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CurveLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let writer = match Self::open(&dir) {
            Ok(writer) => {
                info!(path = %dir.join(METRICS_FILE).display(), "logging training curves");
                Some(writer)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "training curves will not be recorded");
                None
            }
        };
        CurveLogger { dir, writer }
    }

    fn open(dir: &Path) -> Result<csv::Writer<File>> {
        fs::create_dir_all(dir)?;
        Ok(csv::Writer::from_path(dir.join(METRICS_FILE))?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one row; the header is written with the first row
    pub fn record<T: Serialize>(&mut self, row: &T) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.serialize(row).and_then(|_| writer.flush().map_err(csv::Error::from)) {
            warn!(error = %e, "failed to record training curve, disabling curve log");
            self.writer = None;
        }
    }

    pub fn write_graph<T: Serialize>(&self, graph: &T) {
        let path = self.dir.join(GRAPH_FILE);
        let result = fs::create_dir_all(&self.dir)
            .map_err(Error::from)
            .and_then(|_| Ok(serde_json::to_writer_pretty(File::create(&path)?, graph)?));
        match result {
            Ok(()) => info!(path = %path.display(), "model graph written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write model graph"),
        }
    }
}
