//! Channel splitting and backbone input normalization.
//!
//! Source imagery is `[batch, seq, height, width, 5]`, channels-last. Each
//! branch of the dual model sees a 3-channel pseudo-RGB view of it.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use serde::Deserialize;

use crate::error::{ModelError, ModelResult};

/// Channels in the raw imagery.
pub const SOURCE_CHANNELS: usize = 5;
/// Channels per branch view.
pub const VIEW_CHANNELS: usize = 3;

/// Per-channel means (BGR order) subtracted by the ImageNet "caffe" preprocessing.
pub const IMAGENET_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Source channel indices that make up one branch view.
///
/// Channel 2 appears in both default views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewChannels(pub [usize; VIEW_CHANNELS]);

impl ViewChannels {
    pub const A: ViewChannels = ViewChannels([0, 2, 4]);
    pub const B: ViewChannels = ViewChannels([1, 2, 3]);
}

/// Input normalization expected by the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// RGB to BGR reordering, then ImageNet mean subtraction, no scaling.
    #[default]
    CaffeImagenet,
    Identity,
}

impl Normalization {
    /// Normalize a channels-last tensor whose last dim holds 3 channels.
    pub fn apply<B: Backend, const D: usize>(&self, view: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Normalization::Identity => view,
            Normalization::CaffeImagenet => {
                let device = view.device();
                let bgr = view.select(
                    D - 1,
                    Tensor::<B, 1, Int>::from_ints([2, 1, 0], &device),
                );
                let mut shape = [1usize; D];
                shape[D - 1] = VIEW_CHANNELS;
                let mean = Tensor::<B, 1>::from_floats(IMAGENET_BGR_MEAN, &device).reshape(shape);
                bgr - mean
            }
        }
    }
}

/// Fail if any element is NaN. Runs before any other computation on the batch.
pub fn ensure_no_nan<B: Backend, const D: usize>(images: &Tensor<B, D>) -> ModelResult<()> {
    let count: i64 = images
        .clone()
        .is_nan()
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    if count > 0 {
        return Err(ModelError::NanInput {
            count: count as usize,
        });
    }
    Ok(())
}

/// Select the view's channels from `[N, H, W, 5]` frames, keeping their order.
pub fn select_view<B: Backend>(frames: Tensor<B, 4>, view: ViewChannels) -> Tensor<B, 4> {
    let device = frames.device();
    let [a, b, c] = view.0;
    let indices = Tensor::<B, 1, Int>::from_ints([a as i32, b as i32, c as i32], &device);
    frames.select(3, indices)
}

/// Split `[B, T, H, W, 5]` imagery into the two normalized `[B, T, H, W, 3]` views.
pub fn input_transform<B: Backend>(
    images: Tensor<B, 5>,
    normalization: Normalization,
) -> ModelResult<(Tensor<B, 5>, Tensor<B, 5>)> {
    ensure_no_nan(&images)?;
    let [batch, seq, height, width, channels] = images.dims();
    if channels != SOURCE_CHANNELS {
        return Err(ModelError::ChannelMismatch {
            expected: SOURCE_CHANNELS,
            actual: channels,
        });
    }

    let frames = images.reshape([batch * seq, height, width, channels]);
    let view_a = normalization.apply(select_view(frames.clone(), ViewChannels::A));
    let view_b = normalization.apply(select_view(frames, ViewChannels::B));

    let shape = [batch, seq, height, width, VIEW_CHANNELS];
    Ok((view_a.reshape(shape), view_b.reshape(shape)))
}
