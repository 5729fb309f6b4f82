//! Slide decoding backends.

use std::path::Path;

use image::{ImageReader, RgbImage};
use wsi_core::{Error, Result};

/// Decodes a slide file into an RGB raster
pub trait SlideReader: Send + Sync {
    /// Backend name as written in `SLIDE_READER`
    fn name(&self) -> &'static str;

    fn read(&self, path: &Path) -> Result<RgbImage>;
}

/// Reader backed by the `image` crate decoders
#[derive(Debug, Clone, Default)]
pub struct ImageSlideReader;

impl SlideReader for ImageSlideReader {
    fn name(&self) -> &'static str {
        "image"
    }

    fn read(&self, path: &Path) -> Result<RgbImage> {
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Slide file not found: {}", path.display()),
            )));
        }

        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        // Slides routinely exceed the default decoder allocation limit.
        reader.no_limits();

        let decoded = reader.decode().map_err(|e| {
            Error::Image(format!("Failed to decode slide {}: {}", path.display(), e))
        })?;

        Ok(decoded.to_rgb8())
    }
}

/// Resolves a `SLIDE_READER` name to a backend
pub fn reader_from_name(name: &str) -> Result<Box<dyn SlideReader>> {
    match name.to_lowercase().as_str() {
        "image" => Ok(Box::new(ImageSlideReader)),
        other => Err(Error::Config(format!(
            "Unknown SLIDE_READER '{}', expected one of: image",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_reader_from_name() {
        assert_eq!(reader_from_name("image").unwrap().name(), "image");
        assert_eq!(reader_from_name("IMAGE").unwrap().name(), "image");
        assert!(matches!(reader_from_name("openslide"), Err(Error::Config(_))));
    }

    #[test]
    fn test_read_png_slide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slide.png");
        RgbImage::from_pixel(8, 6, Rgb([200u8, 100, 50])).save(&path).unwrap();

        let image = ImageSlideReader.read(&path).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(*image.get_pixel(3, 3), Rgb([200, 100, 50]));
    }

    #[test]
    fn test_missing_and_corrupt_slides() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ImageSlideReader.read(&dir.path().join("missing.png")),
            Err(Error::Io(_))
        ));

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"not a png at all").unwrap();
        assert!(ImageSlideReader.read(&corrupt).is_err());
    }
}
