//! Burn models for sequence regression over 5-channel satellite imagery.
//!
//! - [`DoubleCnnLstm`]: two CNN+LSTM branches over overlapping 3-channel views,
//!   fused with station metadata.
//! - [`DummyModel`]: linear baseline over metadata and frame statistics.
//!
//! Models are plain Burn modules generic over the backend; the training crate
//! picks the backend and drives them through [`SequenceRegressor`].

pub mod backbone;
pub mod double_cnn_lstm;
pub mod dummy;
pub mod error;
pub mod preprocess;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub use backbone::{BackboneConfig, ResNetBackbone};
pub use double_cnn_lstm::{DoubleCnnLstm, DoubleCnnLstmConfig};
pub use dummy::{DummyModel, DummyModelConfig};
pub use error::{ModelError, ModelResult};
pub use preprocess::{input_transform, Normalization, ViewChannels};

/// A model mapping `(metadata [B, M], images [B, T, H, W, 5])` to `[B, K]` predictions.
pub trait SequenceRegressor<B: Backend>: Module<B> {
    /// Fails before any computation when the imagery contains NaN.
    fn forward(&self, metas: Tensor<B, 2>, images: Tensor<B, 5>) -> ModelResult<Tensor<B, 2>>;

    fn target_count(&self) -> usize;
}

pub mod prelude {
    pub use super::{
        DoubleCnnLstm, DoubleCnnLstmConfig, DummyModel, DummyModelConfig, ModelError,
        SequenceRegressor,
    };
}
