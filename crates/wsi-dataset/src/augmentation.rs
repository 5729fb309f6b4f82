//! Randomized geometric and photometric augmentation for slides.
//!
//! Two pipelines share one RNG:
//!
//! - **full**: flips, an affine warp (rotation, scale, translation) with
//!   bilinear sampling, brightness and contrast jitter
//! - **reduced**: the same without the affine warp, followed by a rigid
//!   rotation in `[0, 360)` degrees plus a pixel translation, sampled
//!   nearest-neighbour onto a white background
//!
//! [`SizeAwareAugmentor`] picks the reduced pipeline for images whose raw
//! byte size reaches [`AugmentationConfig::large_image_bytes`], where the
//! interpolating warp is too expensive to run.

use image::{ImageBuffer, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use wsi_core::Result;

/// 4 GiB
pub const LARGE_IMAGE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Applies a random transform to an RGB image
pub trait Augment {
    fn augment(&mut self, image: RgbImage) -> Result<RgbImage>;
}

/// Configuration for slide augmentation
#[derive(Clone, Debug)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of applying vertical flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
    /// Probability of applying the affine warp
    pub affine_prob: f32,
    /// Maximum affine rotation in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Affine scale range
    pub scale_range: (f32, f32),
    /// Affine translation as a fraction of width/height (±)
    pub translate_fraction: f32,
    /// Brightness adjustment range (±brightness_delta)
    pub brightness_delta: f32,
    /// Probability of applying brightness adjustment
    pub brightness_prob: f32,
    /// Contrast adjustment range (1.0 ± contrast_delta)
    pub contrast_delta: f32,
    /// Probability of applying contrast adjustment
    pub contrast_prob: f32,
    /// Raw byte size from which the reduced pipeline is used
    pub large_image_bytes: u64,
    /// Rigid translation range in pixels, `[-n, n)` per axis
    pub large_translate_px: i32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            affine_prob: 0.5,
            rotation_degrees: 180.0,
            scale_range: (0.9, 1.1),
            translate_fraction: 0.05,
            brightness_delta: 0.1,
            brightness_prob: 0.5,
            contrast_delta: 0.2,
            contrast_prob: 0.5,
            large_image_bytes: LARGE_IMAGE_BYTES,
            large_translate_px: 220,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            affine_prob: 0.0,
            rotation_degrees: 0.0,
            scale_range: (1.0, 1.0),
            translate_fraction: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
            contrast_delta: 0.0,
            contrast_prob: 0.0,
            large_image_bytes: LARGE_IMAGE_BYTES,
            large_translate_px: 0,
        }
    }
}

/// Which pipeline an image was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentPath {
    Full,
    Reduced,
}

#[derive(Debug, Clone, Copy)]
enum Sampling {
    Nearest,
    Bilinear,
}

/// Augmentor that switches pipelines on image byte size
#[derive(Clone)]
pub struct SizeAwareAugmentor {
    config: AugmentationConfig,
    rng: ChaCha8Rng,
}

impl SizeAwareAugmentor {
    /// Creates an augmentor; `seed` makes the transform sequence reproducible
    pub fn new(config: AugmentationConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { config, rng }
    }

    pub fn with_defaults(seed: Option<u64>) -> Self {
        Self::new(AugmentationConfig::default(), seed)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Pipeline selected for an image of this size
    pub fn path_for(&self, image: &RgbImage) -> AugmentPath {
        if image.as_raw().len() as u64 >= self.config.large_image_bytes {
            AugmentPath::Reduced
        } else {
            AugmentPath::Full
        }
    }

    /// Flips, affine warp and photometric jitter
    pub fn augment_full(&mut self, image: RgbImage) -> RgbImage {
        let mut result = self.flips(image);

        if self.config.affine_prob > 0.0 && self.rng.gen::<f32>() < self.config.affine_prob {
            let angle = self.symmetric(self.config.rotation_degrees);
            let (lo, hi) = self.config.scale_range;
            let scale = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
            let (width, height) = result.dimensions();
            let tx = self.symmetric(self.config.translate_fraction) * width as f32;
            let ty = self.symmetric(self.config.translate_fraction) * height as f32;
            result = warp(&result, angle, scale, (tx, ty), Sampling::Bilinear, Rgb([0, 0, 0]));
        }

        self.photometric(result)
    }

    /// Flips and photometric jitter only
    pub fn augment_reduced(&mut self, image: RgbImage) -> RgbImage {
        let result = self.flips(image);
        self.photometric(result)
    }

    /// Random rotation in `[0, 360)` plus translation, white fill
    pub fn rigid_transform(&mut self, image: &RgbImage) -> RgbImage {
        let angle = self.rng.gen_range(0.0f32..360.0);
        let n = self.config.large_translate_px;
        let (tx, ty) = if n > 0 {
            (self.rng.gen_range(-n..n), self.rng.gen_range(-n..n))
        } else {
            (0, 0)
        };
        warp(image, angle, 1.0, (tx as f32, ty as f32), Sampling::Nearest, WHITE)
    }

    fn flips(&mut self, image: RgbImage) -> RgbImage {
        let mut result = image;
        if self.rng.gen::<f32>() < self.config.horizontal_flip_prob {
            image::imageops::flip_horizontal_in_place(&mut result);
        }
        if self.rng.gen::<f32>() < self.config.vertical_flip_prob {
            image::imageops::flip_vertical_in_place(&mut result);
        }
        result
    }

    fn photometric(&mut self, image: RgbImage) -> RgbImage {
        let mut result = image;

        if self.config.brightness_prob > 0.0
            && self.rng.gen::<f32>() < self.config.brightness_prob
        {
            let delta = self.symmetric(self.config.brightness_delta);
            adjust_brightness(&mut result, delta);
        }

        if self.config.contrast_prob > 0.0 && self.rng.gen::<f32>() < self.config.contrast_prob {
            let factor = 1.0 + self.symmetric(self.config.contrast_delta);
            adjust_contrast(&mut result, factor);
        }

        result
    }

    fn symmetric(&mut self, range: f32) -> f32 {
        if range > 0.0 {
            self.rng.gen_range(-range..=range)
        } else {
            0.0
        }
    }
}

impl Augment for SizeAwareAugmentor {
    fn augment(&mut self, image: RgbImage) -> Result<RgbImage> {
        match self.path_for(&image) {
            AugmentPath::Full => Ok(self.augment_full(image)),
            AugmentPath::Reduced => {
                debug!(
                    "Image of {} bytes uses the reduced augmentation path",
                    image.as_raw().len()
                );
                let reduced = self.augment_reduced(image);
                Ok(self.rigid_transform(&reduced))
            }
        }
    }
}

/// Rotates by `angle_degrees` and scales about the center, then translates.
///
/// Output pixels are inverse-mapped into the source; samples falling
/// outside it take `fill`.
fn warp(
    image: &RgbImage,
    angle_degrees: f32,
    scale: f32,
    translate: (f32, f32),
    sampling: Sampling,
    fill: Rgb<u8>,
) -> RgbImage {
    let (width, height) = image.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let inv_scale = 1.0 / scale;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - cx - translate.0;
        let dy = y as f32 + 0.5 - cy - translate.1;

        let src_x = cx + (dx * cos_a + dy * sin_a) * inv_scale - 0.5;
        let src_y = cy + (-dx * sin_a + dy * cos_a) * inv_scale - 0.5;

        match sampling {
            Sampling::Nearest => nearest_sample(image, src_x, src_y, fill),
            Sampling::Bilinear => bilinear_sample(image, src_x, src_y, fill),
        }
    })
}

fn nearest_sample(img: &RgbImage, x: f32, y: f32, fill: Rgb<u8>) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let (xr, yr) = (x.round(), y.round());
    if xr < 0.0 || yr < 0.0 || xr >= width as f32 || yr >= height as f32 {
        return fill;
    }
    *img.get_pixel(xr as u32, yr as u32)
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32, fill: Rgb<u8>) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x > width as f32 - 1.0 || y > height as f32 - 1.0 {
        return fill;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

/// Adds `delta * 255` to every channel
fn adjust_brightness(image: &mut RgbImage, delta: f32) {
    let shift = (delta * 255.0) as i32;
    for pixel in image.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as i32 + shift).clamp(0, 255) as u8;
        }
    }
}

/// Scales pixel values around the mean luminance
fn adjust_contrast(image: &mut RgbImage, factor: f32) {
    let count = (image.width() as f64 * image.height() as f64).max(1.0);
    let sum: f64 = image
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();
    let mean = (sum / count) as f32;

    for pixel in image.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (mean + factor * (pixel[c] as f32 - mean)).round().clamp(0.0, 255.0) as u8;
        }
    }
}
