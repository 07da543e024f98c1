//! Epoch/batch training loop with per-batch MSE and Adam updates.

use std::time::{Duration, Instant};

use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::RecorderError;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use burn_dataset::{DatasetError, SequenceDataset};
use models::{ModelError, SequenceRegressor};
use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("loss is {value} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, value: f32 },
    #[error("epoch {epoch} produced no batches ({samples} samples, batch size {batch_size})")]
    EmptyEpoch {
        epoch: usize,
        samples: usize,
        batch_size: usize,
    },
    #[error("checkpoint {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Running average of per-batch losses; reset at each epoch boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn push(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` until the first value arrives.
    pub fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.sum / self.count as f64) as f32)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Log the running loss when `batch_index % log_every == 0`; 0 disables.
    pub log_every: usize,
    /// `false` computes losses without backward passes or updates.
    pub training: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 1e-3,
            log_every: 1000,
            training: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub batches: usize,
    pub mean_loss: f32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub epochs: Vec<EpochReport>,
    /// Total per-batch loss evaluations across all epochs.
    pub loss_evaluations: usize,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.mean_loss)
    }
}

pub struct Trainer {
    cfg: TrainerConfig,
}

impl Trainer {
    pub fn new(cfg: TrainerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.cfg
    }

    /// Run every epoch over `dataset` and return the updated model.
    ///
    /// Any dataset or model error aborts the run, as does a non-finite loss.
    pub fn fit<B, M>(
        &self,
        mut model: M,
        dataset: &SequenceDataset,
        device: &B::Device,
    ) -> TrainResult<(M, TrainReport)>
    where
        B: AutodiffBackend,
        M: SequenceRegressor<B> + AutodiffModule<B>,
    {
        let mut optim = AdamConfig::new().init::<B, M>();
        let mse = MseLoss::new();
        let mut running = RunningMean::default();
        let mut report = TrainReport::default();
        let mode = if self.cfg.training { "train" } else { "eval" };

        for epoch in 0..self.cfg.epochs {
            let started = Instant::now();
            let mut iter = dataset.batches(epoch);
            let mut batch_index = 0usize;

            while let Some(batch) = iter.next_batch::<B>(device)? {
                let preds = model.forward(batch.metadata, batch.images)?;
                let loss = mse.forward(preds, batch.targets, Reduction::Mean);
                let value: f32 = loss.clone().detach().into_scalar().elem();
                if !value.is_finite() {
                    return Err(TrainError::NonFiniteLoss {
                        epoch,
                        batch: batch_index,
                        value,
                    });
                }
                if self.cfg.training {
                    let grads = GradientsParams::from_grads(loss.backward(), &model);
                    model = optim.step(self.cfg.learning_rate, model, grads);
                }
                running.push(value);
                report.loss_evaluations += 1;

                if self.cfg.log_every > 0 && batch_index % self.cfg.log_every == 0 {
                    log::info!(
                        "[{mode}] epoch {}/{} batch {batch_index}: running loss {:.6}",
                        epoch + 1,
                        self.cfg.epochs,
                        running.mean().unwrap_or(value)
                    );
                }
                batch_index += 1;
            }

            let Some(mean_loss) = running.mean() else {
                return Err(TrainError::EmptyEpoch {
                    epoch,
                    samples: dataset.len(),
                    batch_size: dataset.options().batch_size,
                });
            };
            let elapsed = started.elapsed();
            log::info!(
                "[{mode}] epoch {}/{} done: {} batches, mean loss {:.6}, {:.1}s",
                epoch + 1,
                self.cfg.epochs,
                running.count(),
                mean_loss,
                elapsed.as_secs_f32()
            );
            report.epochs.push(EpochReport {
                epoch,
                batches: running.count(),
                mean_loss,
                elapsed,
            });
            running.reset();
        }

        Ok((model, report))
    }
}
