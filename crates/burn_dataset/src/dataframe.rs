//! Dataframe index: a JSON-lines file with one record per look-back window.
//!
//! ```text
//! {"station": "BND", "timestamp": "2015-01-01T12:00:00", "metadata": [0.1, 0.2, 0.3],
//!  "images": "tensors/bnd_0001.f32", "targets": [412.0, null]}
//! ```
//!
//! `images` points (relative to the dataframe's directory) at a raw
//! little-endian f32 tensor of `sequence_length * image_size^2 * 5` values.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::source::RecordSource;
use crate::types::{DatasetError, DatasetResult, IndexSummary, SampleShape};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub station: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub metadata: Vec<f32>,
    pub images: String,
    /// `null` marks a missing target value.
    pub targets: Vec<Option<f32>>,
}

/// What to read and how each sample is shaped.
#[derive(Debug, Clone)]
pub struct DataframeSpec {
    pub path: PathBuf,
    pub stations: Vec<String>,
    pub target_count: usize,
    pub sequence_length: usize,
    pub image_size: usize,
}

/// A record that survived filtering, with its tensor path resolved.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub station: String,
    pub timestamp: Option<String>,
    pub metadata: Vec<f32>,
    pub targets: Vec<f32>,
    pub images: PathBuf,
}

pub fn index_dataframe(spec: &DataframeSpec) -> DatasetResult<(RecordSource, IndexSummary)> {
    let raw = fs::read_to_string(&spec.path).map_err(|e| DatasetError::Io {
        path: spec.path.clone(),
        source: e,
    })?;
    let base = spec.path.parent().unwrap_or_else(|| Path::new("."));
    let stations: HashSet<&str> = spec.stations.iter().map(String::as_str).collect();

    let mut summary = IndexSummary::default();
    let mut meta_dim: Option<usize> = None;
    let mut records = Vec::new();

    for (line_idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: FrameRecord =
            serde_json::from_str(line).map_err(|e| DatasetError::Record {
                path: spec.path.clone(),
                line: line_idx + 1,
                source: e,
            })?;
        summary.total += 1;

        if !stations.contains(record.station.as_str()) {
            summary.other_station += 1;
            continue;
        }
        if record.targets.len() != spec.target_count {
            log::warn!(
                "{}:{}: {} targets, expected {}; skipping",
                spec.path.display(),
                line_idx + 1,
                record.targets.len(),
                spec.target_count
            );
            summary.wrong_target_count += 1;
            continue;
        }
        let Some(targets) = record
            .targets
            .iter()
            .copied()
            .map(|t| t.filter(|v| v.is_finite()))
            .collect::<Option<Vec<f32>>>()
        else {
            summary.missing_targets += 1;
            continue;
        };
        let expected_meta = *meta_dim.get_or_insert(record.metadata.len());
        if record.metadata.len() != expected_meta {
            log::warn!(
                "{}:{}: metadata width {} differs from {}; skipping",
                spec.path.display(),
                line_idx + 1,
                record.metadata.len(),
                expected_meta
            );
            summary.wrong_meta_dim += 1;
            continue;
        }

        records.push(IndexedRecord {
            station: record.station,
            timestamp: record.timestamp,
            metadata: record.metadata,
            targets,
            images: base.join(&record.images),
        });
    }
    summary.kept = records.len();

    if records.is_empty() {
        return Err(DatasetError::Empty(spec.path.clone()));
    }
    if summary.missing_targets > 0 {
        log::warn!(
            "{}: skipped {} record(s) with missing targets",
            spec.path.display(),
            summary.missing_targets
        );
    }
    log::info!(
        "indexed {} of {} record(s) from {} (other stations: {})",
        summary.kept,
        summary.total,
        spec.path.display(),
        summary.other_station
    );

    let shape = SampleShape::new(
        spec.sequence_length,
        spec.image_size,
        meta_dim.unwrap_or_default(),
        spec.target_count,
    );
    Ok((RecordSource::new(records, shape), summary))
}

/// Write a sample's image sequence in the raw tensor file layout.
pub fn write_tensor_file(path: &Path, values: &[f32]) -> DatasetResult<()> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(path, bytes).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

pub(crate) fn read_tensor_file(path: &Path, expected_elems: usize) -> DatasetResult<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if bytes.len() != expected_elems * 4 {
        return Err(DatasetError::TensorSize {
            path: path.to_path_buf(),
            expected: expected_elems * 4,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
