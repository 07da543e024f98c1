use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Validated training configuration.
///
/// Built once from the JSON training config file; everything downstream takes
/// this typed record instead of the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub dataframe_path: Option<PathBuf>,
    pub relative_dataframe_path: Option<PathBuf>,
    pub stations: Vec<String>,
    /// Offset labels (e.g. `P0DT1H0M0S`). Their count is the model output width.
    pub target_time_offsets: Vec<String>,
    pub batch_size: usize,
    pub buffer_size: usize,
}

#[derive(Debug, Deserialize, Default)]
struct TrainConfigFile {
    dataframe_path: Option<String>,
    relative_dataframe_path: Option<String>,
    stations: Option<Vec<String>>,
    target_time_offsets: Option<Vec<String>>,
    batch_size: Option<usize>,
    buffer_size: Option<usize>,
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_slice(&raw).map_err(|e| match e {
            ConfigError::Json { source, .. } => ConfigError::Json {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_slice(raw: &[u8]) -> ConfigResult<Self> {
        let file: TrainConfigFile = serde_json::from_slice(raw).map_err(|e| ConfigError::Json {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: TrainConfigFile) -> ConfigResult<Self> {
        let dataframe_path = file
            .dataframe_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let relative_dataframe_path = file
            .relative_dataframe_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        if dataframe_path.is_none() && relative_dataframe_path.is_none() {
            return Err(ConfigError::MissingField(
                "dataframe_path or relative_dataframe_path",
            ));
        }

        let stations = file.stations.ok_or(ConfigError::MissingField("stations"))?;
        if stations.is_empty() {
            return Err(ConfigError::Invalid {
                field: "stations",
                msg: "at least one station is required".into(),
            });
        }

        let target_time_offsets = file
            .target_time_offsets
            .ok_or(ConfigError::MissingField("target_time_offsets"))?;
        if target_time_offsets.is_empty() {
            return Err(ConfigError::Invalid {
                field: "target_time_offsets",
                msg: "at least one target offset is required".into(),
            });
        }
        let mut seen = HashSet::new();
        for offset in &target_time_offsets {
            if !seen.insert(offset.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "target_time_offsets",
                    msg: format!("duplicate offset {offset}"),
                });
            }
        }

        let batch_size = file.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                msg: "must be at least 1".into(),
            });
        }
        let buffer_size = file.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                msg: "must be at least 1".into(),
            });
        }

        Ok(TrainConfig {
            dataframe_path,
            relative_dataframe_path,
            stations,
            target_time_offsets,
            batch_size,
            buffer_size,
        })
    }

    pub fn target_count(&self) -> usize {
        self.target_time_offsets.len()
    }

    /// Resolve the dataframe file: `dataframe_path` when it exists, otherwise
    /// `relative_dataframe_path` joined onto `cwd`.
    pub fn resolve_dataframe_path(&self, cwd: &Path) -> ConfigResult<PathBuf> {
        let mut tried = Vec::new();
        if let Some(path) = &self.dataframe_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            if self.relative_dataframe_path.is_some() {
                log::warn!(
                    "dataframe_path {} not found; trying relative_dataframe_path",
                    path.display()
                );
            }
            tried.push(path.clone());
        }
        if let Some(rel) = &self.relative_dataframe_path {
            // Relative paths are commonly written with a leading separator.
            let stripped: PathBuf = rel
                .components()
                .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                .collect();
            let candidate = cwd.join(stripped);
            if candidate.is_file() {
                return Ok(candidate);
            }
            tried.push(candidate);
        }
        Err(ConfigError::DataframeNotFound { tried })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sizes() {
        let cfg = TrainConfig::from_slice(
            br#"{"dataframe_path": "df.jsonl", "stations": ["BND"], "target_time_offsets": ["P0DT0H0M0S"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(cfg.target_count(), 1);
    }

    #[test]
    fn missing_paths_rejected() {
        let err = TrainConfig::from_slice(
            br#"{"stations": ["BND"], "target_time_offsets": ["P0DT0H0M0S"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn duplicate_offsets_rejected() {
        let err = TrainConfig::from_slice(
            br#"{"dataframe_path": "a", "stations": ["BND"], "target_time_offsets": ["P0D", "P0D"]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "target_time_offsets",
                ..
            }
        ));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = TrainConfig::from_slice(
            br#"{"dataframe_path": "a", "stations": ["BND"], "target_time_offsets": ["P0D"], "batch_size": 0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "batch_size", .. }));
    }
}
