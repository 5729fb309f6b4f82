//! Model-backed instance scoring for the MIL loader.

use burn::prelude::*;
use tracing::debug;
use wsi_core::{Error, Result};
use wsi_dataset::ImageTensor;
use wsi_loader::InstanceScorer;

use crate::classifier::WsiClassifier;

/// Scores patches with the softmax output of a [`WsiClassifier`]
pub struct ModelScorer<B: Backend> {
    model: WsiClassifier<B>,
    device: B::Device,
}

impl<B: Backend> ModelScorer<B> {
    pub fn new(model: WsiClassifier<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    pub fn model(&self) -> &WsiClassifier<B> {
        &self.model
    }

    /// Swaps in updated weights, e.g. after a training epoch
    pub fn set_model(&mut self, model: WsiClassifier<B>) {
        self.model = model;
    }
}

impl<B: Backend> InstanceScorer for ModelScorer<B> {
    fn score(&self, patches: &[ImageTensor]) -> Result<Vec<Vec<f32>>> {
        let Some(first) = patches.first() else {
            return Ok(Vec::new());
        };
        let [channels, height, width] = first.shape;
        if patches.iter().any(|patch| patch.shape != first.shape) {
            return Err(Error::InvalidArgument("patches differ in shape".to_string()));
        }

        let data: Vec<f32> = patches.iter().flat_map(|patch| patch.data.iter().copied()).collect();
        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(data, [patches.len(), channels, height, width]),
            &self.device,
        );

        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(input)
            .into_data()
            .to_vec()
            .map_err(|e| Error::Model(format!("Failed to read scores: {:?}", e)))?;

        debug!("Scored {} patches", patches.len());
        Ok(probabilities
            .chunks(self.model.num_classes())
            .map(<[f32]>::to_vec)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{build_classifier, WsiClassifierConfig};
    use burn_ndarray::NdArray;
    use wsi_core::ImageDimensions;

    type TestBackend = NdArray;

    #[test]
    fn test_scores_one_row_per_patch() {
        let device = Default::default();
        let config = WsiClassifierConfig::new(3).with_base_filters(4).with_hidden_size(8);
        let model =
            build_classifier::<TestBackend>(&config, ImageDimensions::new(16, 16, 3), None, &device)
                .unwrap();
        let scorer = ModelScorer::new(model, device);

        let patches: Vec<ImageTensor> = (0..5)
            .map(|i| ImageTensor::new(vec![i as f32 / 5.0; 3 * 16 * 16], [3, 16, 16]).unwrap())
            .collect();
        let scores = scorer.score(&patches).unwrap();

        assert_eq!(scores.len(), 5);
        for row in &scores {
            assert_eq!(row.len(), 3);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(scorer.score(&[]).unwrap().is_empty());
    }
}
