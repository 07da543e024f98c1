//! Batch iteration into Burn tensors.

use std::path::Path;
use std::time::{Duration, Instant};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::cache::SequenceCache;
use crate::dataframe::{index_dataframe, DataframeSpec};
use crate::shuffle::buffered_order;
use crate::source::SampleSource;
use crate::synthetic::SyntheticSource;
use crate::types::{DatasetError, DatasetResult, IndexSummary, SampleShape};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// One training step's worth of data.
pub struct SequenceBatch<B: Backend> {
    /// `[batch, meta_dim]`
    pub metadata: Tensor<B, 2>,
    /// `[batch, seq_len, image_size, image_size, channels]`
    pub images: Tensor<B, 5>,
    /// `[batch, target_count]`
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> SequenceBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    /// Shuffle buffer size; `None` keeps dataframe order.
    pub shuffle_buffer: Option<usize>,
    /// Base shuffle seed; each epoch shuffles with `seed + epoch`.
    pub seed: Option<u64>,
    pub drop_last: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle_buffer: None,
            seed: None,
            drop_last: false,
        }
    }
}

/// A sample source plus the policy for walking it in batches.
pub struct SequenceDataset {
    source: Box<dyn SampleSource>,
    options: LoaderOptions,
    seed: u64,
}

impl SequenceDataset {
    pub fn new(source: Box<dyn SampleSource>, options: LoaderOptions) -> DatasetResult<Self> {
        if options.batch_size == 0 {
            return Err(DatasetError::Other("batch_size must be at least 1".into()));
        }
        let seed = options.seed.unwrap_or_else(|| rand::rng().random());
        Ok(Self {
            source,
            options,
            seed,
        })
    }

    /// Index a dataframe and, when `cache_root` is given, serve samples from
    /// the sequence cache under it (building the cache on first use).
    pub fn from_dataframe(
        spec: &DataframeSpec,
        cache_root: Option<&Path>,
        options: LoaderOptions,
    ) -> DatasetResult<(Self, IndexSummary)> {
        let (records, summary) = index_dataframe(spec)?;
        let source: Box<dyn SampleSource> = match cache_root {
            Some(root) => {
                let cache =
                    SequenceCache::for_dataframe(root, &spec.path, &spec.stations, &records.shape())?;
                Box::new(cache.open_or_build(&records)?)
            }
            None => Box::new(records),
        };
        Ok((Self::new(source, options)?, summary))
    }

    pub fn synthetic(
        shape: SampleShape,
        samples: usize,
        options: LoaderOptions,
    ) -> DatasetResult<Self> {
        let seed = options.seed.unwrap_or(0);
        Self::new(Box::new(SyntheticSource::new(shape, samples, seed)?), options)
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn shape(&self) -> SampleShape {
        self.source.shape()
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Batches one epoch yields.
    pub fn num_batches(&self) -> usize {
        let len = self.len();
        let bs = self.options.batch_size;
        if self.options.drop_last {
            len / bs
        } else {
            len.div_ceil(bs)
        }
    }

    /// Fresh iterator over one epoch.
    pub fn batches(&self, epoch: usize) -> BatchIter<'_> {
        let order = match self.options.shuffle_buffer {
            Some(buffer) => {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
                buffered_order(self.len(), buffer, &mut rng)
            }
            None => (0..self.len()).collect(),
        };
        BatchIter::new(self.source.as_ref(), order, &self.options)
    }
}

/// Walks one epoch's visit order, loading each batch's samples with rayon.
pub struct BatchIter<'a> {
    source: &'a dyn SampleSource,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    drop_last: bool,
    shape: SampleShape,
    metadata_buf: Vec<f32>,
    images_buf: Vec<f32>,
    targets_buf: Vec<f32>,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl<'a> BatchIter<'a> {
    fn new(source: &'a dyn SampleSource, order: Vec<usize>, options: &LoaderOptions) -> Self {
        let log_every_samples = match std::env::var("SEQUENCE_DATASET_LOG_EVERY") {
            Ok(val) if val.eq_ignore_ascii_case("off") || val.trim() == "0" => None,
            Ok(val) => val.trim().parse::<usize>().ok().filter(|v| *v > 0),
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        Self {
            shape: source.shape(),
            source,
            order,
            cursor: 0,
            batch_size: options.batch_size,
            drop_last: options.drop_last,
            metadata_buf: Vec::new(),
            images_buf: Vec::new(),
            targets_buf: Vec::new(),
            processed_samples: 0,
            processed_batches: 0,
            started: Instant::now(),
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
            log_every_samples,
        }
    }

    /// Samples not yet handed out this epoch.
    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<SequenceBatch<B>>> {
        let remaining = self.remaining();
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            self.cursor = self.order.len();
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let t_load = Instant::now();
        let source = self.source;
        let samples = slice
            .par_iter()
            .map(|&idx| source.load(idx))
            .collect::<DatasetResult<Vec<_>>>()?;
        self.total_load_time += t_load.elapsed();

        self.metadata_buf.clear();
        self.images_buf.clear();
        self.targets_buf.clear();
        for sample in &samples {
            sample.check_shape(&self.shape)?;
            self.metadata_buf.extend_from_slice(&sample.metadata);
            self.images_buf.extend_from_slice(&sample.images);
            self.targets_buf.extend_from_slice(&sample.targets);
        }

        let n = samples.len();
        let shape = self.shape;
        let metadata = Tensor::<B, 1>::from_floats(self.metadata_buf.as_slice(), device)
            .reshape([n, shape.meta_dim]);
        let images = Tensor::<B, 1>::from_floats(self.images_buf.as_slice(), device).reshape([
            n,
            shape.sequence_length,
            shape.image_size,
            shape.image_size,
            shape.channels,
        ]);
        let targets = Tensor::<B, 1>::from_floats(self.targets_buf.as_slice(), device)
            .reshape([n, shape.target_count]);

        self.processed_samples += n;
        self.processed_batches += 1;
        self.maybe_log_progress();

        Ok(Some(SequenceBatch {
            metadata,
            images,
            targets,
        }))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        log::debug!(
            "[dataset] batches={} samples={} elapsed={:.1}s rate={:.1} samples/s avg_load_ms={:.2}",
            self.processed_batches,
            self.processed_samples,
            secs,
            self.processed_samples as f32 / secs,
            self.total_load_time.as_secs_f64() * 1000.0 / self.processed_batches as f64
        );
        self.last_logged_samples = self.processed_samples;
    }
}
