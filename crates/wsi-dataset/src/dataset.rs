//! CSV-indexed slide dataset.
//!
//! Samples are read lazily: indexing only touches the CSV, every
//! [`SlideSource::get_item`] call decodes the slide from disk again.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tracing::{debug, info};
use wsi_core::{DataLoadConfig, Error, ImageDimensions, Result, SlideRecord};

use crate::preprocess::center_crop_or_pad;
use crate::reader::{reader_from_name, SlideReader};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// A decoded slide and its bag-level label
#[derive(Debug, Clone)]
pub struct SlideSample {
    pub image: RgbImage,
    pub label: usize,
}

/// Random-access source of labelled slides
pub trait SlideSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads one sample; may fail on IO or decode errors
    fn get_item(&self, index: usize) -> Result<SlideSample>;

    fn slide_path(&self, index: usize) -> Result<PathBuf>;

    /// Ground-truth label without decoding the slide
    fn y_true(&self, index: usize) -> Result<usize>;
}

/// Slides listed in a CSV file and decoded on demand
pub struct SlideDataset {
    records: Vec<SlideRecord>,
    slide_dir: PathBuf,
    extension: String,
    target_size: ImageDimensions,
    resize_ratio: f64,
    reader: Box<dyn SlideReader>,
}

impl SlideDataset {
    /// Creates a dataset from already-parsed records
    pub fn new(
        records: Vec<SlideRecord>,
        slide_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        target_size: ImageDimensions,
        resize_ratio: f64,
        reader: Box<dyn SlideReader>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::Config("Slide dataset has no records".to_string()));
        }
        if !(resize_ratio > 0.0 && resize_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "Resize ratio must be in (0, 1], got {}",
                resize_ratio
            )));
        }

        Ok(Self {
            records,
            slide_dir: slide_dir.into(),
            extension: extension.into(),
            target_size,
            resize_ratio,
            reader,
        })
    }

    /// Builds the dataset described by a `[data_load]` table
    pub fn from_config(config: &DataLoadConfig) -> Result<Self> {
        let reader = reader_from_name(&config.slide_reader)?;
        let records = read_slide_csv(&config.train_csv_path)?;

        info!(
            "Indexed {} slides from {} (reader: {})",
            records.len(),
            config.train_csv_path.display(),
            reader.name()
        );

        Self::new(
            records,
            &config.slide_dir,
            &config.slide_file_extension,
            config.input_dimensions(),
            config.resize_ratio,
            reader,
        )
    }

    pub fn records(&self) -> &[SlideRecord] {
        &self.records
    }

    /// Number of slides per class label
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for record in &self.records {
            if record.label < num_classes {
                counts[record.label] += 1;
            }
        }
        counts
    }

    fn record(&self, index: usize) -> Result<&SlideRecord> {
        self.records.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }

    /// Downscales by the resize ratio, then fits the slide onto the canvas
    fn fit(&self, slide: RgbImage) -> RgbImage {
        let scaled = if self.resize_ratio < 1.0 {
            let (width, height) = slide.dimensions();
            let new_w = ((width as f64 * self.resize_ratio).round() as u32).max(1);
            let new_h = ((height as f64 * self.resize_ratio).round() as u32).max(1);
            image::imageops::resize(&slide, new_w, new_h, FilterType::Triangle)
        } else {
            slide
        };

        center_crop_or_pad(
            &scaled,
            self.target_size.width,
            self.target_size.height,
            BACKGROUND,
        )
    }
}

impl SlideSource for SlideDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get_item(&self, index: usize) -> Result<SlideSample> {
        let record = self.record(index)?;
        let path = record.slide_path(&self.slide_dir, &self.extension);

        debug!("Reading slide {} ({})", index, path.display());
        let slide = self.reader.read(&path)?;

        Ok(SlideSample {
            image: self.fit(slide),
            label: record.label,
        })
    }

    fn slide_path(&self, index: usize) -> Result<PathBuf> {
        let record = self.record(index)?;
        Ok(record.slide_path(&self.slide_dir, &self.extension))
    }

    fn y_true(&self, index: usize) -> Result<usize> {
        Ok(self.record(index)?.label)
    }
}

/// Parses a `slide_name,label` CSV with a header row
pub fn read_slide_csv(path: &Path) -> Result<Vec<SlideRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::Config(format!("Failed to open slide CSV {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: SlideRecord = row
            .map_err(|e| Error::Config(format!("Malformed row in {}: {}", path.display(), e)))?;
        records.push(record);
    }

    Ok(records)
}
