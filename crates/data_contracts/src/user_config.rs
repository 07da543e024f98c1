use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Free-form user configuration (JSON or TOML).
///
/// The trainer does not interpret it; model and dataset builders pull out the
/// section they own with [`UserConfig::section`].
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    source: Option<PathBuf>,
    value: Value,
}

impl UserConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            source: None,
            value,
        }
    }

    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let is_toml = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let value = if is_toml {
            toml::from_str::<Value>(&raw).map_err(|e| ConfigError::Toml {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            serde_json::from_str::<Value>(&raw).map_err(|e| ConfigError::Json {
                path: path.to_path_buf(),
                source: e,
            })?
        };
        Ok(Self {
            source: Some(path.to_path_buf()),
            value,
        })
    }

    /// Load from an optional path; `None` yields an empty config.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Ok(Self::empty()),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Deserialize a top-level section. Missing sections are `Ok(None)`.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> ConfigResult<Option<T>> {
        let Some(section) = self.value.get(name) else {
            return Ok(None);
        };
        if section.is_null() {
            return Ok(None);
        }
        serde_json::from_value(section.clone())
            .map(Some)
            .map_err(|e| ConfigError::Section {
                section: name.to_string(),
                source: e,
            })
    }

    /// Like [`UserConfig::section`], falling back to `T::default()`.
    pub fn section_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> ConfigResult<T> {
        Ok(self.section(name)?.unwrap_or_default())
    }

    pub fn dataset_tuning(&self) -> ConfigResult<DatasetTuning> {
        let tuning: DatasetTuning = self.section_or_default("dataset")?;
        tuning.validate()?;
        Ok(tuning)
    }
}

/// Dataset-loader knobs carried in the `dataset` section of the user config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetTuning {
    /// Frames per look-back window.
    pub sequence_length: usize,
    /// Square image side in pixels.
    pub image_size: usize,
    pub seed: Option<u64>,
    pub drop_last: bool,
}

impl Default for DatasetTuning {
    fn default() -> Self {
        Self {
            sequence_length: 6,
            image_size: 64,
            seed: None,
            drop_last: false,
        }
    }
}

impl DatasetTuning {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sequence_length == 0 {
            return Err(ConfigError::Invalid {
                field: "dataset.sequence_length",
                msg: "must be at least 1".into(),
            });
        }
        if self.image_size == 0 {
            return Err(ConfigError::Invalid {
                field: "dataset.image_size",
                msg: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
