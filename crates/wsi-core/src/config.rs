//! Configuration structures for the data-load stage.
//!
//! The on-disk format is a TOML file with a `[data_load]` table whose keys
//! keep the uppercase names used by the training configs, e.g.
//!
//! ```toml
//! [data_load]
//! TRAIN_CSV_PATH = "data/train.csv"
//! SLIDE_DIR = "data/slides"
//! SLIDE_FILE_EXTENSION = ".tiff"
//! INPUT_SIZE = [4096, 4096, 3]
//! RESIZE_RATIO = 0.25
//! SLIDE_READER = "image"
//! NUM_CLASSES = 2
//! BATCH_SIZE = 1
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ImageDimensions, PatchSize};
use crate::{Error, Result};

/// Top-level pipeline configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data_load: DataLoadConfig,
}

impl PipelineConfig {
    /// Loads and validates a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = crate::cli::load_toml_config(path)?;
        config.data_load.validate()?;
        Ok(config)
    }
}

/// Which batch loader the data-load stage builds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// One whole (downscaled) slide per batch position
    WholeSlide,
    /// Top-K scored patches per slide
    #[default]
    Mil,
}

impl std::fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderKind::WholeSlide => write!(f, "whole_slide"),
            LoaderKind::Mil => write!(f, "mil"),
        }
    }
}

/// Options of the `[data_load]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoadConfig {
    /// CSV listing `slide_name,label` rows
    #[serde(rename = "TRAIN_CSV_PATH")]
    pub train_csv_path: PathBuf,
    /// Directory holding the slide files
    #[serde(rename = "SLIDE_DIR")]
    pub slide_dir: PathBuf,
    /// Extension appended to each slide name, including the dot
    #[serde(rename = "SLIDE_FILE_EXTENSION")]
    pub slide_file_extension: String,
    /// Slide canvas size as `[H, W, C]`
    #[serde(rename = "INPUT_SIZE")]
    pub input_size: [u32; 3],
    /// Downscale factor applied to slides when read
    #[serde(rename = "RESIZE_RATIO")]
    pub resize_ratio: f64,
    /// Slide decoder backend name
    #[serde(rename = "SLIDE_READER")]
    pub slide_reader: String,
    /// Snapshot directory; no snapshots when absent
    #[serde(rename = "DEBUG_PATH", default)]
    pub debug_path: Option<PathBuf>,
    #[serde(rename = "NUM_CLASSES")]
    pub num_classes: usize,
    #[serde(rename = "BATCH_SIZE")]
    pub batch_size: usize,

    #[serde(rename = "MIL_INFER_BATCH_SIZE", default)]
    pub mil_infer_batch_size: Option<usize>,
    /// Patch size as `[h, w]`
    #[serde(rename = "MIL_PATCH_SIZE", default)]
    pub mil_patch_size: Option<[u32; 2]>,
    #[serde(rename = "MIL_USE_EM", default)]
    pub mil_use_em: Option<bool>,
    #[serde(rename = "MIL_K", default)]
    pub mil_k: Option<usize>,
    #[serde(rename = "MIL_SKIP_WHITE", default)]
    pub mil_skip_white: Option<bool>,
    /// Mean intensity at or above which a patch counts as background
    #[serde(rename = "MIL_WHITE_THRESHOLD", default)]
    pub mil_white_threshold: Option<f32>,

    /// Directory for `x_batch`/`y_batch` dumps
    #[serde(rename = "X_Y_Batch_Path", default)]
    pub x_y_batch_path: Option<PathBuf>,

    #[serde(rename = "LOADER", default)]
    pub loader: LoaderKind,
    #[serde(rename = "SHUFFLE", default = "default_true")]
    pub shuffle: bool,
    #[serde(rename = "AUGMENT", default = "default_true")]
    pub augment: bool,
    /// Seed for shuffling and augmentation; entropy when absent
    #[serde(rename = "SEED", default)]
    pub seed: Option<u64>,
    /// Pretrained backbone record for the scoring model
    #[serde(rename = "BACKBONE_WEIGHTS", default)]
    pub backbone_weights: Option<PathBuf>,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_true() -> bool {
    true
}

/// Retry behaviour for slide reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempts before giving up; 0 retries forever
    #[serde(rename = "MAX_ATTEMPTS", default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "INITIAL_BACKOFF_SECS", default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,
    #[serde(rename = "MULTIPLIER", default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(rename = "MAX_BACKOFF_SECS", default = "default_max_backoff")]
    pub max_backoff_secs: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff() -> f64 {
    5.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> f64 {
    300.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            multiplier: default_multiplier(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_backoff_secs >= 0.0) || !self.initial_backoff_secs.is_finite() {
            return Err(Error::Config(format!(
                "retry.INITIAL_BACKOFF_SECS must be a non-negative number, got {}",
                self.initial_backoff_secs
            )));
        }
        if !(self.multiplier >= 1.0) || !self.multiplier.is_finite() {
            return Err(Error::Config(format!(
                "retry.MULTIPLIER must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if !(self.max_backoff_secs >= self.initial_backoff_secs)
            || !self.max_backoff_secs.is_finite()
        {
            return Err(Error::Config(format!(
                "retry.MAX_BACKOFF_SECS ({}) must not be below INITIAL_BACKOFF_SECS ({})",
                self.max_backoff_secs, self.initial_backoff_secs
            )));
        }
        Ok(())
    }
}

/// Validated MIL settings, present only when every MIL key is set
#[derive(Debug, Clone, PartialEq)]
pub struct MilSettings {
    pub infer_batch_size: usize,
    pub patch_size: PatchSize,
    pub use_em: bool,
    pub k: usize,
    pub skip_white: bool,
    pub white_threshold: Option<f32>,
}

impl DataLoadConfig {
    /// Slide canvas dimensions
    pub fn input_dimensions(&self) -> ImageDimensions {
        ImageDimensions::from_hwc(self.input_size)
    }

    /// Validates value ranges and cross-key requirements
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(Error::Config("NUM_CLASSES must be greater than 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("BATCH_SIZE must be greater than 0".to_string()));
        }

        let [height, width, channels] = self.input_size;
        if height == 0 || width == 0 {
            return Err(Error::Config(format!(
                "INPUT_SIZE height and width must be positive, got {:?}",
                self.input_size
            )));
        }
        if channels != 3 {
            return Err(Error::Config(format!(
                "INPUT_SIZE must have 3 channels, got {}",
                channels
            )));
        }

        if !(self.resize_ratio > 0.0 && self.resize_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "RESIZE_RATIO must be in (0, 1], got {}",
                self.resize_ratio
            )));
        }

        if self.slide_file_extension.is_empty() {
            return Err(Error::Config("SLIDE_FILE_EXTENSION must not be empty".to_string()));
        }

        self.retry.validate()?;

        if self.loader == LoaderKind::Mil {
            self.mil()?;
        }

        Ok(())
    }

    /// Resolves the MIL keys, failing on the first missing or invalid one
    pub fn mil(&self) -> Result<MilSettings> {
        let infer_batch_size = required(self.mil_infer_batch_size, "MIL_INFER_BATCH_SIZE")?;
        let [patch_h, patch_w] = required(self.mil_patch_size, "MIL_PATCH_SIZE")?;
        let use_em = required(self.mil_use_em, "MIL_USE_EM")?;
        let k = required(self.mil_k, "MIL_K")?;
        let skip_white = required(self.mil_skip_white, "MIL_SKIP_WHITE")?;

        if infer_batch_size == 0 {
            return Err(Error::Config("MIL_INFER_BATCH_SIZE must be greater than 0".to_string()));
        }
        if k == 0 {
            return Err(Error::Config("MIL_K must be greater than 0".to_string()));
        }
        if patch_h == 0 || patch_w == 0 {
            return Err(Error::Config("MIL_PATCH_SIZE must be positive".to_string()));
        }
        if patch_h > self.input_size[0] || patch_w > self.input_size[1] {
            return Err(Error::Config(format!(
                "MIL_PATCH_SIZE {:?} exceeds INPUT_SIZE {:?}",
                [patch_h, patch_w],
                self.input_size
            )));
        }

        let white_threshold = match (skip_white, self.mil_white_threshold) {
            (true, None) => {
                return Err(Error::Config(
                    "MIL_WHITE_THRESHOLD is required when MIL_SKIP_WHITE is true".to_string(),
                ))
            }
            (true, Some(t)) if !(0.0..=255.0).contains(&t) => {
                return Err(Error::Config(format!(
                    "MIL_WHITE_THRESHOLD must be in [0, 255], got {}",
                    t
                )))
            }
            (true, threshold) => threshold,
            (false, _) => None,
        };

        Ok(MilSettings {
            infer_batch_size,
            patch_size: PatchSize::new(patch_h, patch_w),
            use_em,
            k,
            skip_white,
            white_threshold,
        })
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("missing required key {}", key)))
}
