//! Random-access sample sources behind the batch iterator.

use crate::dataframe::{read_tensor_file, IndexedRecord};
use crate::types::{DatasetError, DatasetResult, SampleShape, SequenceSample};

/// Indexed, immutable collection of equally shaped samples.
///
/// `load` may be called from several rayon workers at once.
pub trait SampleSource: Send + Sync {
    fn len(&self) -> usize;

    fn shape(&self) -> SampleShape;

    fn load(&self, index: usize) -> DatasetResult<SequenceSample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples read on demand from the tensor files of an indexed dataframe.
#[derive(Debug, Clone)]
pub struct RecordSource {
    records: Vec<IndexedRecord>,
    shape: SampleShape,
}

impl RecordSource {
    pub fn new(records: Vec<IndexedRecord>, shape: SampleShape) -> Self {
        Self { records, shape }
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }
}

impl SampleSource for RecordSource {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn shape(&self) -> SampleShape {
        self.shape
    }

    fn load(&self, index: usize) -> DatasetResult<SequenceSample> {
        let record = self.records.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.records.len(),
        })?;
        let images = read_tensor_file(&record.images, self.shape.image_elems())?;
        Ok(SequenceSample {
            metadata: record.metadata.clone(),
            images,
            targets: record.targets.clone(),
        })
    }
}

/// Samples already resident in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    samples: Vec<SequenceSample>,
    shape: SampleShape,
}

impl InMemorySource {
    pub fn new(samples: Vec<SequenceSample>, shape: SampleShape) -> DatasetResult<Self> {
        shape.validate()?;
        for sample in &samples {
            sample.check_shape(&shape)?;
        }
        Ok(Self { samples, shape })
    }
}

impl SampleSource for InMemorySource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn shape(&self) -> SampleShape {
        self.shape
    }

    fn load(&self, index: usize) -> DatasetResult<SequenceSample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(DatasetError::OutOfRange {
                index,
                len: self.samples.len(),
            })
    }
}
