//! Diagnostic snapshot of the most recent augmented sample.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use wsi_core::{Error, Result};

/// File name written inside the snapshot directory
pub const SNAPSHOT_FILE_NAME: &str = "dataloader_snapshot.tiff";

/// Overwrites a single TIFF with each image it is given
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Writes `image`, creating the directory on first use.
    ///
    /// The encoder takes RGB channel order, so the file shows the image
    /// with its true colours.
    pub fn write(&self, image: &RgbImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path();
        image
            .save_with_format(&path, image::ImageFormat::Tiff)
            .map_err(|e| {
                Error::Image(format!("Failed to write snapshot {}: {}", path.display(), e))
            })?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_overwrites() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("debug"));

        writer.write(&RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]))).unwrap();
        let path = writer.write(&RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]))).unwrap();

        assert_eq!(path, temp.path().join("debug").join(SNAPSHOT_FILE_NAME));
        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*written.get_pixel(1, 1), Rgb([0, 0, 255]));
        assert_eq!(std::fs::read_dir(writer.dir()).unwrap().count(), 1);
    }
}
