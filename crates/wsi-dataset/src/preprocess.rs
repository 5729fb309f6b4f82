//! Pixel normalization, label encoding and canvas fitting.
//!
//! Pixels are mapped from `[0, 255]` to `[-1, 1]` with
//! `(v - 127.5) / 127.5`; [`denormalize`] is the exact inverse up to
//! clamping and rounding. Tensors are stored channel-first (CHW) so they can
//! be stacked straight into a `[N, C, H, W]` batch.

use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use wsi_core::{Error, Result};

const PIXEL_CENTER: f32 = 127.5;

/// Normalized image data in CHW layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    /// Flattened values, channel-major
    pub data: Vec<f32>,
    /// `[channels, height, width]`
    pub shape: [usize; 3],
}

impl ImageTensor {
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "Expected {} values for shape {:?}, got {}",
                expected,
                shape,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn channels(&self) -> usize {
        self.shape[0]
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Value at channel `c`, row `y`, column `x`
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * self.height() * self.width() + y * self.width() + x]
    }
}

/// Maps one pixel value from `[0, 255]` to `[-1, 1]`
pub fn normalize_value(value: f32) -> f32 {
    (value - PIXEL_CENTER) / PIXEL_CENTER
}

/// Maps one normalized value back to `[0, 255]`, clamped
pub fn denormalize_value(value: f32) -> f32 {
    (value * PIXEL_CENTER + PIXEL_CENTER).clamp(0.0, 255.0)
}

/// `width * height` without overflowing `u32` on gigapixel canvases
pub fn area(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Normalizes an RGB image into a CHW tensor
pub fn normalize(image: &RgbImage) -> ImageTensor {
    let (width, height) = image.dimensions();
    let plane = area(width, height);
    let mut data = vec![0.0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width as usize + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = normalize_value(pixel[c] as f32);
        }
    }

    ImageTensor {
        data,
        shape: [3, height as usize, width as usize],
    }
}

/// Reconstructs an RGB image from a normalized CHW tensor
pub fn denormalize(tensor: &ImageTensor) -> Result<RgbImage> {
    if tensor.channels() != 3 {
        return Err(Error::InvalidArgument(format!(
            "Expected 3 channels, got {}",
            tensor.channels()
        )));
    }

    let (height, width) = (tensor.height(), tensor.width());
    let mut image = ImageBuffer::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let mut pixel = Rgb([0u8; 3]);
            for c in 0..3 {
                pixel[c] = denormalize_value(tensor.get(c, y, x)).round() as u8;
            }
            image.put_pixel(x as u32, y as u32, pixel);
        }
    }

    Ok(image)
}

/// One-hot vector of length `num_classes` with 1.0 at `label`
pub fn one_hot(label: usize, num_classes: usize) -> Result<Vec<f32>> {
    if label >= num_classes {
        return Err(Error::LabelOutOfRange { label, num_classes });
    }
    let mut encoded = vec![0.0f32; num_classes];
    encoded[label] = 1.0;
    Ok(encoded)
}

/// Center crops or pads an image to exact dimensions, filling with `fill`
pub fn center_crop_or_pad(
    image: &RgbImage,
    target_w: u32,
    target_h: u32,
    fill: Rgb<u8>,
) -> RgbImage {
    let (width, height) = image.dimensions();

    if width == target_w && height == target_h {
        return image.clone();
    }

    let mut result = ImageBuffer::from_pixel(target_w, target_h, fill);

    let x_offset = target_w.saturating_sub(width) / 2;
    let y_offset = target_h.saturating_sub(height) / 2;
    let src_x0 = width.saturating_sub(target_w) / 2;
    let src_y0 = height.saturating_sub(target_h) / 2;

    for y in 0..height.min(target_h) {
        for x in 0..width.min(target_w) {
            let pixel = image.get_pixel(src_x0 + x, src_y0 + y);
            result.put_pixel(x_offset + x, y_offset + y, *pixel);
        }
    }

    result
}
