//! Slide dataset loading and preprocessing library.
//!
//! This crate reads whole-slide images listed in a CSV file, augments them,
//! and converts them into normalized tensors for the batch loaders.

pub mod augmentation;
pub mod dataset;
pub mod preprocess;
pub mod reader;
pub mod snapshot;

pub use augmentation::{Augment, AugmentationConfig, SizeAwareAugmentor};
pub use dataset::{read_slide_csv, SlideDataset, SlideSample, SlideSource};
pub use preprocess::{denormalize, normalize, one_hot, ImageTensor};
pub use reader::{reader_from_name, ImageSlideReader, SlideReader};
pub use snapshot::SnapshotWriter;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::augmentation::*;
    pub use crate::dataset::*;
    pub use crate::preprocess::*;
    pub use crate::reader::*;
    pub use crate::snapshot::*;
}
