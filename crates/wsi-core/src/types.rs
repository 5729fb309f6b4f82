//! Core type definitions shared across the pipeline crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One row of the training CSV: a slide and its bag-level label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlideRecord {
    /// Slide file stem, resolved against the slide directory
    pub slide_name: String,
    /// Class label (index)
    pub label: usize,
}

impl SlideRecord {
    /// Creates a new slide record
    pub fn new(slide_name: impl Into<String>, label: usize) -> Self {
        Self {
            slide_name: slide_name.into(),
            label,
        }
    }

    /// Full path of the slide file for a given directory and extension
    pub fn slide_path(&self, slide_dir: &std::path::Path, extension: &str) -> PathBuf {
        slide_dir.join(format!("{}{}", self.slide_name, extension))
    }
}

/// Image dimensions in height-width-channels order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image height in pixels
    pub height: u32,
    /// Image width in pixels
    pub width: u32,
    /// Number of channels (3 for RGB)
    pub channels: u32,
}

impl ImageDimensions {
    /// Creates new image dimensions
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Builds dimensions from an `[H, W, C]` triple
    pub fn from_hwc(hwc: [u32; 3]) -> Self {
        Self::new(hwc[0], hwc[1], hwc[2])
    }

    /// Total number of values in one image
    pub fn total_values(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

/// Patch dimensions used when tiling a slide
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSize {
    pub height: u32,
    pub width: u32,
}

impl PatchSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Model input dimensions for a patch with the given channel count
    pub fn with_channels(&self, channels: u32) -> ImageDimensions {
        ImageDimensions::new(self.height, self.width, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_slide_path() {
        let record = SlideRecord::new("TCGA-01", 1);
        assert_eq!(
            record.slide_path(Path::new("/data/slides"), ".tiff"),
            PathBuf::from("/data/slides/TCGA-01.tiff")
        );
    }

    #[test]
    fn test_image_dimensions() {
        let dims = ImageDimensions::from_hwc([512, 256, 3]);
        assert_eq!(dims.height, 512);
        assert_eq!(dims.width, 256);
        assert_eq!(dims.total_values(), 512 * 256 * 3);
    }

    #[test]
    fn test_patch_with_channels() {
        let dims = PatchSize::new(224, 224).with_channels(3);
        assert_eq!(dims, ImageDimensions::new(224, 224, 3));
    }
}
