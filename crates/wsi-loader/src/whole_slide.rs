//! Loader yielding one whole slide per batch element.

use std::path::PathBuf;

use tracing::debug;
use wsi_core::{DataLoadConfig, Result};
use wsi_dataset::{normalize, one_hot, SlideSource};

use crate::sample::SampleLoader;
use crate::sequence::{Batch, BatchSequence, ShuffledSource};

/// Batches of normalized slides with one-hot labels.
///
/// Batch `i` covers shuffle positions `[i * batch_size, (i + 1) * batch_size)`.
pub struct WholeSlideLoader<D> {
    source: ShuffledSource<D>,
    num_classes: usize,
    samples: SampleLoader,
}

impl<D: SlideSource> WholeSlideLoader<D> {
    pub fn new(
        dataset: D,
        batch_size: usize,
        num_classes: usize,
        shuffle: bool,
        seed: Option<u64>,
        samples: SampleLoader,
    ) -> Result<Self> {
        Ok(Self {
            source: ShuffledSource::new(dataset, batch_size, shuffle, seed)?,
            num_classes,
            samples,
        })
    }

    pub fn from_config(dataset: D, config: &DataLoadConfig) -> Result<Self> {
        Self::new(
            dataset,
            config.batch_size,
            config.num_classes,
            config.shuffle,
            config.seed,
            SampleLoader::from_config(config),
        )
    }

    pub fn num_batches(&self) -> usize {
        self.source.num_batches()
    }

    pub fn batch_size(&self) -> usize {
        self.source.batch_size
    }

    pub fn dataset(&self) -> &D {
        &self.source.dataset
    }

    pub fn dataset_index_for(&self, position: usize) -> Result<usize> {
        self.source.dataset_index_for(position)
    }

    pub fn slide_path_for(&self, position: usize) -> Result<PathBuf> {
        self.source.slide_path_for(position)
    }

    pub fn ground_truth_for(&self, position: usize) -> Result<usize> {
        self.source.ground_truth_for(position)
    }
}

impl<D: SlideSource> BatchSequence for WholeSlideLoader<D> {
    fn len(&self) -> usize {
        self.num_batches()
    }

    fn get_batch(&mut self, index: usize) -> Result<Batch> {
        let positions = self.source.positions(index)?;
        let mut batch = Batch::with_capacity(positions.len());

        for position in positions {
            let dataset_index = self.source.dataset_index_for(position)?;
            let sample = self.samples.load(&self.source.dataset, dataset_index)?;

            let image = normalize(&sample.image);
            let label = one_hot(sample.label, self.num_classes)?;
            batch.push(image, label, dataset_index);
        }

        debug!("Assembled batch {} with {} slides", index, batch.len());
        Ok(batch)
    }

    fn on_epoch_end(&mut self) {
        self.source.shuffle.reinit();
    }
}
