//! ResNet-style convolutional feature extractor.

use std::path::Path;

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::Deserialize;

use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Output channels of the 7x7 stem convolution.
    pub stem_channels: usize,
    /// Output channels per residual stage. Every stage after the first halves
    /// the spatial resolution.
    pub stage_channels: Vec<usize>,
    pub blocks_per_stage: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            stem_channels: 32,
            stage_channels: vec![32, 64, 128],
            blocks_per_stage: 1,
        }
    }
}

impl BackboneConfig {
    /// Channel count of the produced feature map.
    pub fn out_channels(&self) -> usize {
        self.stage_channels
            .last()
            .copied()
            .unwrap_or(self.stem_channels)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.stem_channels == 0 || self.stage_channels.iter().any(|c| *c == 0) {
            return Err(ModelError::InvalidConfig(
                "backbone channel counts must be positive".into(),
            ));
        }
        if !self.stage_channels.is_empty() && self.blocks_per_stage == 0 {
            return Err(ModelError::InvalidConfig(
                "backbone stages need at least one block".into(),
            ));
        }
        Ok(())
    }
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = kernel / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(false)
        .init(device)
}

/// Two 3x3 convolutions with an identity or 1x1 projection shortcut.
#[derive(Debug, Module)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

#[derive(Debug, Module)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| Projection {
            conv: conv([in_channels, out_channels], 1, stride, device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });
        Self {
            conv1: conv([in_channels, out_channels], 3, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv([out_channels, out_channels], 3, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            shortcut,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.shortcut {
            Some(proj) => proj.bn.forward(proj.conv.forward(input.clone())),
            None => input.clone(),
        };
        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        relu(x + residual)
    }
}

/// Feature extractor over `[N, 3, H, W]` frames producing `[N, C, h, w]` maps.
#[derive(Debug, Module)]
pub struct ResNetBackbone<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    out_channels: usize,
}

impl<B: Backend> ResNetBackbone<B> {
    pub fn new(cfg: &BackboneConfig, in_channels: usize, device: &B::Device) -> Self {
        let stem = conv([in_channels, cfg.stem_channels], 7, 2, device);
        let stem_bn = BatchNormConfig::new(cfg.stem_channels).init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::new();
        let mut channels = cfg.stem_channels;
        for (stage, &out) in cfg.stage_channels.iter().enumerate() {
            for block in 0..cfg.blocks_per_stage {
                let stride = if stage > 0 && block == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(channels, out, stride, device));
                channels = out;
            }
        }

        Self {
            stem,
            stem_bn,
            stem_pool,
            blocks,
            out_channels: cfg.out_channels(),
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, frames: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.stem_bn.forward(self.stem.forward(frames)));
        let mut x = self.stem_pool.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }

    /// Replace the freshly initialized weights with a pretrained record.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> ModelResult<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        log::info!("loading pretrained backbone weights from {}", path.display());
        self.load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| ModelError::Checkpoint {
                path: path.to_path_buf(),
                source: e,
            })
    }
}
