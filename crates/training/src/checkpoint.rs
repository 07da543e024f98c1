use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;

use crate::factory::ModelKind;
use crate::trainer::{TrainError, TrainResult};

/// `checkpoints/<model name>.bin`
pub fn default_checkpoint_path(kind: ModelKind) -> PathBuf {
    Path::new("checkpoints").join(format!("{}.bin", kind.name()))
}

/// Save `model` as a full-precision Burn record. The recorder always writes a
/// `.bin` extension; the returned path is the file actually written.
pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> TrainResult<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TrainError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(path.with_extension("bin"))
}

/// Load weights saved by [`save_checkpoint`] into a model of the same configuration.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> TrainResult<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path, &recorder, device)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            source: e,
        })
}
