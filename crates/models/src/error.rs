use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("input imagery contains {count} NaN value(s)")]
    NanInput { count: usize },
    #[error("expected {expected} image channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("expected metadata width {expected}, got {actual}")]
    MetadataMismatch { expected: usize, actual: usize },
    #[error("batch size mismatch: images carry {images} sequences, metadata {metadata} rows")]
    BatchMismatch { images: usize, metadata: usize },
    #[error("invalid model config: {0}")]
    InvalidConfig(String),
    #[error("failed to load weights from {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
}
