//! Batch sequence abstraction shared by the loaders.

use std::ops::Range;
use std::path::PathBuf;

use wsi_core::{Error, Result};
use wsi_dataset::{ImageTensor, SlideSource};

use crate::shuffle::ShuffleIndex;

/// One assembled batch of normalized images and one-hot labels
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Vec<ImageTensor>,
    pub labels: Vec<Vec<f32>>,
    /// Dataset index each element was drawn from
    pub dataset_indices: Vec<usize>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            images: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
            dataset_indices: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, image: ImageTensor, label: Vec<f32>, dataset_index: usize) {
        self.images.push(image);
        self.labels.push(label);
        self.dataset_indices.push(dataset_index);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// `[C, H, W]` of the first image
    pub fn image_shape(&self) -> Option<[usize; 3]> {
        self.images.first().map(|image| image.shape)
    }

    pub fn num_classes(&self) -> Option<usize> {
        self.labels.first().map(Vec::len)
    }
}

/// Random-access batches over a dataset, reshuffled between epochs
pub trait BatchSequence {
    /// Number of full batches; a trailing partial batch is dropped
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assembles batch `index`; nothing partial is returned on failure
    fn get_batch(&mut self, index: usize) -> Result<Batch>;

    /// Regenerates the shuffle order. Called by the driver between epochs.
    fn on_epoch_end(&mut self);
}

/// A dataset paired with its current shuffle order
pub(crate) struct ShuffledSource<D> {
    pub(crate) dataset: D,
    pub(crate) shuffle: ShuffleIndex,
    pub(crate) batch_size: usize,
}

impl<D: SlideSource> ShuffledSource<D> {
    pub(crate) fn new(
        dataset: D,
        batch_size: usize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be greater than 0".to_string()));
        }
        let shuffle = ShuffleIndex::new(dataset.len(), shuffle, seed);
        Ok(Self {
            dataset,
            shuffle,
            batch_size,
        })
    }

    pub(crate) fn num_batches(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    /// Shuffle positions covered by `batch_index`
    pub(crate) fn positions(&self, batch_index: usize) -> Result<Range<usize>> {
        let num_batches = self.num_batches();
        if batch_index >= num_batches {
            return Err(Error::IndexOutOfRange {
                index: batch_index,
                len: num_batches,
            });
        }
        let start = batch_index * self.batch_size;
        Ok(start..start + self.batch_size)
    }

    pub(crate) fn dataset_index_for(&self, position: usize) -> Result<usize> {
        self.shuffle.get(position)
    }

    pub(crate) fn slide_path_for(&self, position: usize) -> Result<PathBuf> {
        self.dataset.slide_path(self.shuffle.get(position)?)
    }

    pub(crate) fn ground_truth_for(&self, position: usize) -> Result<usize> {
        self.dataset.y_true(self.shuffle.get(position)?)
    }
}
