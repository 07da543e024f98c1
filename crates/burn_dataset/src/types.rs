//! Core types, error definitions, and data structures for burn_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Channels per frame in the raw imagery.
pub const FRAME_CHANNELS: usize = 5;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("bad record at {path}:{line}: {source}")]
    Record {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("tensor file {path} holds {actual} bytes, expected {expected}")]
    TensorSize {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("corrupt cache shard {path}: {msg}")]
    CorruptShard { path: PathBuf, msg: String },
    #[error("sample {index} out of range for dataset of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("no usable samples in {0}")]
    Empty(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// Per-sample tensor geometry shared by every sample of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleShape {
    pub sequence_length: usize,
    pub image_size: usize,
    pub channels: usize,
    pub meta_dim: usize,
    pub target_count: usize,
}

impl SampleShape {
    pub fn new(sequence_length: usize, image_size: usize, meta_dim: usize, target_count: usize) -> Self {
        Self {
            sequence_length,
            image_size,
            channels: FRAME_CHANNELS,
            meta_dim,
            target_count,
        }
    }

    /// Reject geometry with no frames or no pixels.
    pub fn validate(&self) -> DatasetResult<()> {
        for (name, value) in [
            ("sequence_length", self.sequence_length),
            ("image_size", self.image_size),
            ("channels", self.channels),
        ] {
            if value == 0 {
                return Err(DatasetError::Other(format!(
                    "sample shape {name} must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// f32 elements in one sample's image sequence.
    pub fn image_elems(&self) -> usize {
        self.sequence_length * self.image_size * self.image_size * self.channels
    }

    /// f32 elements in one flattened sample (metadata, targets, images).
    pub fn sample_elems(&self) -> usize {
        self.meta_dim + self.target_count + self.image_elems()
    }
}

/// One look-back window: metadata, channels-last image sequence, targets.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSample {
    pub metadata: Vec<f32>,
    /// `[sequence_length, image_size, image_size, channels]`, row-major.
    pub images: Vec<f32>,
    pub targets: Vec<f32>,
}

impl SequenceSample {
    pub fn check_shape(&self, shape: &SampleShape) -> DatasetResult<()> {
        if self.metadata.len() != shape.meta_dim
            || self.targets.len() != shape.target_count
            || self.images.len() != shape.image_elems()
        {
            return Err(DatasetError::Other(format!(
                "sample shape mismatch: metadata {}/{}, targets {}/{}, images {}/{}",
                self.metadata.len(),
                shape.meta_dim,
                self.targets.len(),
                shape.target_count,
                self.images.len(),
                shape.image_elems()
            )));
        }
        Ok(())
    }
}

/// Counters collected while indexing a dataframe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub total: usize,
    pub kept: usize,
    pub other_station: usize,
    pub missing_targets: usize,
    pub wrong_target_count: usize,
    pub wrong_meta_dim: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(SampleShape::new(2, 4, 0, 1).validate().is_ok());
        assert!(SampleShape::new(0, 4, 3, 2).validate().is_err());
        assert!(SampleShape::new(2, 0, 3, 2).validate().is_err());
        let mut shape = SampleShape::new(2, 4, 3, 2);
        shape.channels = 0;
        assert!(shape.validate().is_err());
    }
}
