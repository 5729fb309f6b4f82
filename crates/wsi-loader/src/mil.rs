//! Multiple-instance loader: each slide is a bag of patches and only its
//! top-K instances under the current model reach the batch.
//!
//! Per bag the loader tiles the (augmented) slide into non-overlapping
//! patches, optionally drops background patches, scores the rest with an
//! [`InstanceScorer`] and keeps the `k` patches with the highest
//! probability for the bag label. Ties keep tiling order. A bag with fewer
//! than `k` candidate patches repeats its ranked list.

use std::cmp::Ordering;
use std::path::PathBuf;

use image::{GenericImageView, RgbImage};
use tracing::debug;
use wsi_core::{DataLoadConfig, Error, MilSettings, PatchSize, Result};
use wsi_dataset::preprocess::area;
use wsi_dataset::{normalize, one_hot, ImageTensor, SlideSource};

use crate::sample::SampleLoader;
use crate::sequence::{Batch, BatchSequence, ShuffledSource};

/// Scores patch instances; returns one class-probability row per patch
pub trait InstanceScorer {
    fn score(&self, patches: &[ImageTensor]) -> Result<Vec<Vec<f32>>>;
}

/// Batches of top-K patches, `k` per slide
pub struct MilLoader<D, S> {
    source: ShuffledSource<D>,
    scorer: S,
    settings: MilSettings,
    num_classes: usize,
    samples: SampleLoader,
}

impl<D: SlideSource, S: InstanceScorer> MilLoader<D, S> {
    /// `batch_size` counts slides; each batch holds `batch_size * k` patches
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset: D,
        scorer: S,
        settings: MilSettings,
        batch_size: usize,
        num_classes: usize,
        shuffle: bool,
        seed: Option<u64>,
        samples: SampleLoader,
    ) -> Result<Self> {
        if settings.use_em {
            return Err(Error::Unsupported(
                "MIL_USE_EM: expectation-maximization instance selection is not implemented"
                    .to_string(),
            ));
        }
        if settings.k == 0 || settings.infer_batch_size == 0 {
            return Err(Error::InvalidArgument(
                "MIL k and inference batch size must be greater than 0".to_string(),
            ));
        }
        if settings.patch_size.height == 0 || settings.patch_size.width == 0 {
            return Err(Error::InvalidArgument(format!(
                "MIL patch size must be positive, got {}x{}",
                settings.patch_size.height, settings.patch_size.width
            )));
        }
        if settings.skip_white && settings.white_threshold.is_none() {
            return Err(Error::InvalidArgument(
                "skipping white patches needs a white threshold".to_string(),
            ));
        }

        Ok(Self {
            source: ShuffledSource::new(dataset, batch_size, shuffle, seed)?,
            scorer,
            settings,
            num_classes,
            samples,
        })
    }

    pub fn from_config(dataset: D, scorer: S, config: &DataLoadConfig) -> Result<Self> {
        Self::new(
            dataset,
            scorer,
            config.mil()?,
            config.batch_size,
            config.num_classes,
            config.shuffle,
            config.seed,
            SampleLoader::from_config(config),
        )
    }

    pub fn num_batches(&self) -> usize {
        self.source.num_batches()
    }

    pub fn dataset(&self) -> &D {
        &self.source.dataset
    }

    pub fn settings(&self) -> &MilSettings {
        &self.settings
    }

    pub fn dataset_index_for(&self, position: usize) -> Result<usize> {
        self.source.dataset_index_for(position)
    }

    pub fn slide_path_for(&self, position: usize) -> Result<PathBuf> {
        self.source.slide_path_for(position)
    }

    pub fn ground_truth_for(&self, position: usize) -> Result<usize> {
        self.source.ground_truth_for(position)
    }

    /// Top-K normalized patches of one bag
    fn select_instances(&self, image: &RgbImage, label: usize) -> Result<Vec<ImageTensor>> {
        let mut patches = tile(image, self.settings.patch_size);
        if patches.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "slide of {}x{} is smaller than one {}x{} patch",
                image.width(),
                image.height(),
                self.settings.patch_size.width,
                self.settings.patch_size.height
            )));
        }

        if let (true, Some(threshold)) = (self.settings.skip_white, self.settings.white_threshold) {
            let total = patches.len();
            let tissue: Vec<RgbImage> = patches
                .iter()
                .filter(|patch| mean_intensity(patch) < threshold)
                .cloned()
                .collect();
            if tissue.is_empty() {
                debug!("All {} patches are background, keeping them", total);
            } else {
                patches = tissue;
            }
        }

        let tensors: Vec<ImageTensor> = patches.iter().map(normalize).collect();
        let scores = self.score_all(&tensors, label)?;
        let ranked = rank_descending(&scores);

        Ok(ranked
            .iter()
            .cycle()
            .take(self.settings.k)
            .map(|&i| tensors[i].clone())
            .collect())
    }

    /// Probability of `label` for every patch, scored in inference chunks
    fn score_all(&self, tensors: &[ImageTensor], label: usize) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(tensors.len());
        for chunk in tensors.chunks(self.settings.infer_batch_size) {
            let probabilities = self.scorer.score(chunk)?;
            if probabilities.len() != chunk.len() {
                return Err(Error::Model(format!(
                    "scorer returned {} rows for {} patches",
                    probabilities.len(),
                    chunk.len()
                )));
            }
            for row in probabilities {
                let score = row.get(label).copied().ok_or(Error::LabelOutOfRange {
                    label,
                    num_classes: row.len(),
                })?;
                scores.push(score);
            }
        }
        Ok(scores)
    }
}

impl<D: SlideSource, S: InstanceScorer> BatchSequence for MilLoader<D, S> {
    fn len(&self) -> usize {
        self.num_batches()
    }

    fn get_batch(&mut self, index: usize) -> Result<Batch> {
        let positions = self.source.positions(index)?;
        let mut batch = Batch::with_capacity(positions.len() * self.settings.k);

        for position in positions {
            let dataset_index = self.source.dataset_index_for(position)?;
            let sample = self.samples.load(&self.source.dataset, dataset_index)?;
            let label = one_hot(sample.label, self.num_classes)?;

            for patch in self.select_instances(&sample.image, sample.label)? {
                batch.push(patch, label.clone(), dataset_index);
            }
        }

        debug!("Assembled MIL batch {} with {} instances", index, batch.len());
        Ok(batch)
    }

    fn on_epoch_end(&mut self) {
        self.source.shuffle.reinit();
    }
}

/// Non-overlapping patches in row-major order; edge remainders are dropped
pub fn tile(image: &RgbImage, patch: PatchSize) -> Vec<RgbImage> {
    if patch.width == 0 || patch.height == 0 {
        return Vec::new();
    }
    let (width, height) = image.dimensions();
    let cols = width / patch.width;
    let rows = height / patch.height;

    let mut patches = Vec::with_capacity(area(cols, rows));
    for row in 0..rows {
        for col in 0..cols {
            let view = image.view(col * patch.width, row * patch.height, patch.width, patch.height);
            patches.push(view.to_image());
        }
    }
    patches
}

/// Mean over all channels and pixels, in `[0, 255]`
pub fn mean_intensity(patch: &RgbImage) -> f32 {
    let raw = patch.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let sum: u64 = raw.iter().map(|&v| v as u64).sum();
    (sum as f64 / raw.len() as f64) as f32
}

/// Indices sorted by descending score, stable; NaN sorts last
fn rank_descending(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| match (scores[a].is_nan(), scores[b].is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal),
    });
    order
}
