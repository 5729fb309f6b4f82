//! Per-sample read pipeline: retried read, augmentation and snapshot.

use tracing::warn;
use wsi_core::{DataLoadConfig, Result};
use wsi_dataset::{Augment, SizeAwareAugmentor, SlideSample, SlideSource, SnapshotWriter};

use crate::retry::{load_with_retry, RetryPolicy, Sleeper, ThreadSleeper};

/// Reads one sample the way both loaders need it
pub struct SampleLoader {
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper + Send>,
    augmentor: Option<Box<dyn Augment + Send>>,
    snapshot: Option<SnapshotWriter>,
}

impl SampleLoader {
    /// Default retry policy, no augmentation and no snapshots
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sleeper: Box::new(ThreadSleeper),
            augmentor: None,
            snapshot: None,
        }
    }

    pub fn from_config(config: &DataLoadConfig) -> Self {
        let mut loader = Self::new().with_retry(RetryPolicy::from(&config.retry));

        if config.augment {
            // Offset so augmentation draws differ from the shuffle stream.
            let seed = config.seed.map(|seed| seed.wrapping_add(1));
            loader = loader.with_augmentor(Box::new(SizeAwareAugmentor::with_defaults(seed)));
        }
        if let Some(dir) = &config.debug_path {
            loader = loader.with_snapshot(SnapshotWriter::new(dir));
        }

        loader
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper + Send>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_augmentor(mut self, augmentor: Box<dyn Augment + Send>) -> Self {
        self.augmentor = Some(augmentor);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotWriter) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn augments(&self) -> bool {
        self.augmentor.is_some()
    }

    /// Reads dataset item `index`, retrying per the policy, then augments it
    pub fn load<D: SlideSource + ?Sized>(
        &mut self,
        dataset: &D,
        index: usize,
    ) -> Result<SlideSample> {
        let path = dataset.slide_path(index)?;
        let mut sample = load_with_retry(&self.retry, self.sleeper.as_mut(), index, &path, || {
            dataset.get_item(index)
        })?;

        if let Some(augmentor) = self.augmentor.as_mut() {
            sample.image = augmentor.augment(sample.image)?;
        }

        if let Some(snapshot) = &self.snapshot {
            if let Err(err) = snapshot.write(&sample.image) {
                warn!("Could not write dataloader snapshot: {}", err);
            }
        }

        Ok(sample)
    }
}

impl Default for SampleLoader {
    fn default() -> Self {
        Self::new()
    }
}
