//! Sequence dataset loading for the irradiance regressors.
//!
//! This crate provides utilities for:
//! - Indexing a JSON-lines dataframe of look-back windows
//! - Random-access sample sources (tensor files, cache shards, synthetic data)
//! - Bounded-buffer shuffling with per-epoch seeds
//! - An on-disk, checksummed sequence cache
//! - Batch iteration into Burn tensors

// Module declarations
pub mod batch;
pub mod cache;
pub mod dataframe;
pub mod shuffle;
pub mod source;
pub mod synthetic;
pub mod types;

// Re-export public API
pub use batch::{BatchIter, LoaderOptions, SequenceBatch, SequenceDataset};
pub use cache::{CacheManifest, SequenceCache, ShardSource};
pub use dataframe::{index_dataframe, write_tensor_file, DataframeSpec, FrameRecord, IndexedRecord};
pub use shuffle::buffered_order;
pub use source::{InMemorySource, RecordSource, SampleSource};
pub use synthetic::SyntheticSource;
pub use types::*;
