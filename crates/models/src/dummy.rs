use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::Deserialize;

use crate::error::{ModelError, ModelResult};
use crate::preprocess::{ensure_no_nan, SOURCE_CHANNELS};
use crate::SequenceRegressor;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DummyModelConfig {
    pub target_count: usize,
    pub meta_dim: usize,
    pub clamp_non_negative: bool,
}

impl Default for DummyModelConfig {
    fn default() -> Self {
        Self {
            target_count: 1,
            meta_dim: 0,
            clamp_non_negative: true,
        }
    }
}

/// Linear baseline over metadata and the last frame's channel means.
#[derive(Debug, Module)]
pub struct DummyModel<B: Backend> {
    head: Linear<B>,
    clamp_non_negative: bool,
    meta_dim: usize,
    target_count: usize,
}

impl<B: Backend> DummyModel<B> {
    pub fn new(cfg: &DummyModelConfig, device: &B::Device) -> ModelResult<Self> {
        if cfg.target_count == 0 {
            return Err(ModelError::InvalidConfig(
                "target_count must be at least 1".into(),
            ));
        }
        Ok(Self {
            head: LinearConfig::new(cfg.meta_dim + SOURCE_CHANNELS, cfg.target_count)
                .init(device),
            clamp_non_negative: cfg.clamp_non_negative,
            meta_dim: cfg.meta_dim,
            target_count: cfg.target_count,
        })
    }
}

impl<B: Backend> SequenceRegressor<B> for DummyModel<B> {
    fn forward(&self, metas: Tensor<B, 2>, images: Tensor<B, 5>) -> ModelResult<Tensor<B, 2>> {
        ensure_no_nan(&images)?;
        let [batch, seq, height, width, channels] = images.dims();
        if channels != SOURCE_CHANNELS {
            return Err(ModelError::ChannelMismatch {
                expected: SOURCE_CHANNELS,
                actual: channels,
            });
        }
        let [meta_rows, meta_dim] = metas.dims();
        if meta_rows != batch {
            return Err(ModelError::BatchMismatch {
                images: batch,
                metadata: meta_rows,
            });
        }
        if meta_dim != self.meta_dim {
            return Err(ModelError::MetadataMismatch {
                expected: self.meta_dim,
                actual: meta_dim,
            });
        }

        // Pixel values are on a 0..255 scale.
        let last = images
            .slice([0..batch, seq - 1..seq, 0..height, 0..width, 0..channels])
            .reshape([batch, height * width, channels])
            .mean_dim(1)
            .reshape([batch, channels])
            .div_scalar(255.0);
        let out = self.head.forward(Tensor::cat(vec![metas, last], 1));
        Ok(if self.clamp_non_negative { relu(out) } else { out })
    }

    fn target_count(&self) -> usize {
        self.target_count
    }
}
