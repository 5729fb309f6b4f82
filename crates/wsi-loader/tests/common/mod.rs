#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};
use wsi_core::{Error, Result};
use wsi_dataset::{SlideSample, SlideSource};
use wsi_loader::Sleeper;

/// In-memory slides with scripted read failures
pub struct StubDataset {
    slides: Vec<(RgbImage, usize)>,
    failures: RefCell<HashMap<usize, u32>>,
    reads: Cell<usize>,
}

impl StubDataset {
    /// `len` flat slides whose red channel encodes their index
    pub fn uniform(len: usize, size: u32, num_classes: usize) -> Self {
        let slides = (0..len)
            .map(|i| {
                let image = RgbImage::from_pixel(size, size, Rgb([i as u8, 0, 255]));
                (image, i % num_classes)
            })
            .collect();
        Self::from_slides(slides)
    }

    pub fn from_slides(slides: Vec<(RgbImage, usize)>) -> Self {
        Self {
            slides,
            failures: RefCell::new(HashMap::new()),
            reads: Cell::new(0),
        }
    }

    /// Makes the next `count` reads of `index` fail
    pub fn fail(self, index: usize, count: u32) -> Self {
        self.failures.borrow_mut().insert(index, count);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl SlideSource for StubDataset {
    fn len(&self) -> usize {
        self.slides.len()
    }

    fn get_item(&self, index: usize) -> Result<SlideSample> {
        self.reads.set(self.reads.get() + 1);

        if let Some(remaining) = self.failures.borrow_mut().get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Image(format!("slide {} is still being written", index)));
            }
        }

        let (image, label) = self.slides.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.slides.len(),
        })?;
        Ok(SlideSample {
            image: image.clone(),
            label: *label,
        })
    }

    fn slide_path(&self, index: usize) -> Result<PathBuf> {
        Ok(PathBuf::from(format!("stub/slide_{:03}.tiff", index)))
    }

    fn y_true(&self, index: usize) -> Result<usize> {
        self.slides.get(index).map(|(_, label)| *label).ok_or(Error::IndexOutOfRange {
            index,
            len: self.slides.len(),
        })
    }
}

/// Records requested backoffs instead of sleeping
#[derive(Clone, Default)]
pub struct RecordingSleeper(pub Arc<Mutex<Vec<Duration>>>);

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}
