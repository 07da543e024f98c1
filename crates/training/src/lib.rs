#![recursion_limit = "256"]

pub mod checkpoint;
pub mod factory;
pub mod trainer;
pub mod util;

pub use checkpoint::{default_checkpoint_path, load_checkpoint, save_checkpoint};
pub use factory::{FactoryError, ModelFactory, ModelKind, RegressionModel};
pub use trainer::{EpochReport, RunningMean, TrainError, TrainReport, TrainResult, Trainer, TrainerConfig};
pub use util::{loader_options, run_train, BackendKind, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

/// Gradient-tracking backend the trainer runs on.
pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
