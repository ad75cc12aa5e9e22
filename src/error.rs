// src/error.rs
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single file. Always recovered by the batch and surfaced in the
/// report, never returned out of [`crate::rebase::rebase_batch`].
#[derive(Debug, Error)]
pub enum FileError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no readable header row in {path}")]
    NoHeader {
        path: PathBuf,
        #[source]
        source: Option<csv::Error>,
    },

    #[error("read failed in {path} at record {record}: {source}")]
    Read {
        path: PathBuf,
        record: u64,
        #[source]
        source: csv::Error,
    },

    #[error("write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot move finished output into place at {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    /// Short machine-friendly tag used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FileError::Open { .. } => "open",
            FileError::NoHeader { .. } => "no_header",
            FileError::Read { .. } => "read",
            FileError::Write { .. } => "write",
            FileError::Rename { .. } => "rename",
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<WriteSource>) -> Self {
        FileError::Write {
            path: path.into(),
            source: source.into().0,
        }
    }
}

/// Adapter so csv and io write errors both land in [`FileError::Write`].
pub(crate) struct WriteSource(io::Error);

impl From<io::Error> for WriteSource {
    fn from(e: io::Error) -> Self {
        WriteSource(e)
    }
}

impl From<csv::Error> for WriteSource {
    fn from(e: csv::Error) -> Self {
        WriteSource(io::Error::from(e))
    }
}

/// Whole-batch failures. Only these abort a run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot list timeseries files in {dir}: {reason}")]
    Discover { dir: PathBuf, reason: String },

    #[error("no dates detected in any of {files} file(s) under {dir}")]
    NoValidDatesInBatch { dir: PathBuf, files: usize },

    #[error("output directory {dir} is the source directory; inputs are never rewritten in place")]
    DestinationIsSource { dir: PathBuf },

    #[error("cannot create output directory {dir}: {source}")]
    CreateOutputDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
