//! Dual-branch CNN+LSTM regressor.
//!
//! Each branch runs its own backbone frame by frame over one 3-channel view of
//! the imagery, pools and projects every frame, and summarizes the sequence
//! with an LSTM. The two summaries are fused with the station metadata by a
//! dense regression head with one output per target time offset.

use std::path::PathBuf;

use burn::module::{Ignored, Module};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::Deserialize;

use crate::backbone::{BackboneConfig, ResNetBackbone};
use crate::error::{ModelError, ModelResult};
use crate::preprocess::{input_transform, Normalization, VIEW_CHANNELS};
use crate::SequenceRegressor;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DoubleCnnLstmConfig {
    /// Number of target time offsets (output width).
    pub target_count: usize,
    /// Width of the metadata vector concatenated before the head.
    pub meta_dim: usize,
    pub backbone: BackboneConfig,
    pub frame_features: usize,
    pub lstm_hidden: usize,
    pub summary_features: usize,
    pub normalization: Normalization,
    /// Apply ReLU to the head output, which forces predictions to be >= 0.
    pub clamp_non_negative: bool,
    /// Optional pretrained backbone record, loaded into both branches.
    pub backbone_weights: Option<PathBuf>,
}

impl Default for DoubleCnnLstmConfig {
    fn default() -> Self {
        Self {
            target_count: 1,
            meta_dim: 0,
            backbone: BackboneConfig::default(),
            frame_features: 256,
            lstm_hidden: 128,
            summary_features: 32,
            normalization: Normalization::CaffeImagenet,
            clamp_non_negative: true,
            backbone_weights: None,
        }
    }
}

impl DoubleCnnLstmConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.target_count == 0 {
            return Err(ModelError::InvalidConfig(
                "target_count must be at least 1".into(),
            ));
        }
        if self.frame_features == 0 || self.lstm_hidden == 0 || self.summary_features == 0 {
            return Err(ModelError::InvalidConfig(
                "layer widths must be positive".into(),
            ));
        }
        self.backbone.validate()
    }
}

/// One view's pathway: backbone, pooling, per-frame projection, LSTM, summary.
#[derive(Debug, Module)]
pub struct Branch<B: Backend> {
    backbone: ResNetBackbone<B>,
    pool: AdaptiveAvgPool2d,
    frame_dense: Linear<B>,
    lstm: Lstm<B>,
    summary: Linear<B>,
}

impl<B: Backend> Branch<B> {
    fn new(cfg: &DoubleCnnLstmConfig, device: &B::Device) -> ModelResult<Self> {
        let mut backbone = ResNetBackbone::new(&cfg.backbone, VIEW_CHANNELS, device);
        if let Some(path) = &cfg.backbone_weights {
            backbone = backbone.load_pretrained(path, device)?;
        }
        Ok(Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            frame_dense: LinearConfig::new(backbone.out_channels(), cfg.frame_features)
                .init(device),
            lstm: LstmConfig::new(cfg.frame_features, cfg.lstm_hidden, true).init(device),
            summary: LinearConfig::new(cfg.lstm_hidden, cfg.summary_features).init(device),
            backbone,
        })
    }

    /// `[B, T, H, W, 3]` view to a `[B, summary_features]` summary.
    fn forward(&self, view: Tensor<B, 5>) -> Tensor<B, 2> {
        let [batch, seq, height, width, channels] = view.dims();

        // Frames are independent here; time only enters at the LSTM.
        let frames = view
            .reshape([batch * seq, height, width, channels])
            .permute([0, 3, 1, 2]);
        let features = self.pool.forward(self.backbone.forward(frames));
        let [_, feat, _, _] = features.dims();
        let per_frame = relu(self.frame_dense.forward(features.reshape([batch, seq, feat])));

        let (_, state) = self.lstm.forward(per_frame, None);
        relu(self.summary.forward(state.hidden))
    }
}

#[derive(Debug, Module)]
pub struct DoubleCnnLstm<B: Backend> {
    branch_a: Branch<B>,
    branch_b: Branch<B>,
    head: Linear<B>,
    normalization: Ignored<Normalization>,
    clamp_non_negative: bool,
    meta_dim: usize,
    target_count: usize,
}

impl<B: Backend> DoubleCnnLstm<B> {
    pub fn new(cfg: &DoubleCnnLstmConfig, device: &B::Device) -> ModelResult<Self> {
        cfg.validate()?;
        let fused = 2 * cfg.summary_features + cfg.meta_dim;
        Ok(Self {
            branch_a: Branch::new(cfg, device)?,
            branch_b: Branch::new(cfg, device)?,
            head: LinearConfig::new(fused, cfg.target_count).init(device),
            normalization: Ignored(cfg.normalization),
            clamp_non_negative: cfg.clamp_non_negative,
            meta_dim: cfg.meta_dim,
            target_count: cfg.target_count,
        })
    }

    pub fn meta_dim(&self) -> usize {
        self.meta_dim
    }
}

impl<B: Backend> SequenceRegressor<B> for DoubleCnnLstm<B> {
    fn forward(&self, metas: Tensor<B, 2>, images: Tensor<B, 5>) -> ModelResult<Tensor<B, 2>> {
        let (view_a, view_b) = input_transform(images, self.normalization.0)?;

        let [batch, ..] = view_a.dims();
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

        let summary_a = self.branch_a.forward(view_a);
        let summary_b = self.branch_b.forward(view_b);
        let fused = Tensor::cat(vec![summary_a, summary_b, metas], 1);

        let out = self.head.forward(fused);
        Ok(if self.clamp_non_negative { relu(out) } else { out })
    }

    fn target_count(&self) -> usize {
        self.target_count
    }
}
