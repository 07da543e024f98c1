//! Shared data contracts for training runs: the validated training config and
//! the free-form user config handed to model and dataset builders.

pub mod error;
pub mod train_config;
pub mod user_config;

pub use error::{ConfigError, ConfigResult};
pub use train_config::{TrainConfig, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE};
pub use user_config::{DatasetTuning, UserConfig};
