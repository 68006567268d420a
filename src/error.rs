use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("sample {id} is {found:?}, expected {expected:?} like the first sample")]
    DimensionMismatch {
        id: String,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("sample {id} is {width}x{height}, both sides must be multiples of 256")]
    UnsupportedSize { id: String, width: u32, height: u32 },
    #[error("no edge maps found in {path}")]
    EmptyDataset { path: PathBuf },
    #[error("cannot extract a sample id from {path}")]
    InvalidSampleName { path: PathBuf },
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("recorder error: {0}")]
    Recorder(String),
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no checkpoint found in {path}")]
    NoCheckpoint { path: PathBuf },
    #[error("tensor data error: {0}")]
    TensorData(String),
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Self::Recorder(err.to_string())
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
