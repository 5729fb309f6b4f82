//! Batch loaders for whole-slide image training.
//!
//! Two [`BatchSequence`] implementations share one read path: a shuffled
//! index over the dataset, retried slide reads, optional augmentation and
//! snapshotting, then normalization and one-hot labels.
//!
//! - [`WholeSlideLoader`]: one downscaled slide per batch element
//! - [`MilLoader`]: the top-K scored patches of each slide

pub mod dump;
pub mod mil;
pub mod retry;
pub mod sample;
pub mod sequence;
pub mod shuffle;
pub mod whole_slide;

pub use dump::{BatchDumper, DumpedArray};
pub use mil::{InstanceScorer, MilLoader};
pub use retry::{load_with_retry, RetryPolicy, Sleeper, ThreadSleeper};
pub use sample::SampleLoader;
pub use sequence::{Batch, BatchSequence};
pub use shuffle::ShuffleIndex;
pub use whole_slide::WholeSlideLoader;
