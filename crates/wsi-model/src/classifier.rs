//! Frozen-backbone slide classifier.
//!
//! A convolutional feature extractor feeds a global average pool and a
//! two-layer head (`Linear(1024)` + ReLU, then `Linear(num_classes)`). Only
//! the head is trained: the backbone comes out of [`build_classifier`] with
//! gradients disabled, optionally initialised from a pretrained record.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use tracing::info;
use wsi_core::{Error, ImageDimensions};

/// Each backbone block halves the spatial size.
const BACKBONE_BLOCKS: u32 = 4;

/// Configuration for [`WsiClassifier`]
#[derive(Config, Debug)]
pub struct WsiClassifierConfig {
    pub num_classes: usize,

    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first block; doubles per block
    #[config(default = "32")]
    pub base_filters: usize,

    #[config(default = "1024")]
    pub hidden_size: usize,
}

/// Conv2d, BatchNorm, ReLU and 2x2 max pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Feature extractor: 3 -> base -> 2*base -> 4*base -> 8*base channels
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(in_channels: usize, base: usize, device: &B::Device) -> Self {
        Self {
            block1: ConvBlock::new(in_channels, base, device),
            block2: ConvBlock::new(base, base * 2, device),
            block3: ConvBlock::new(base * 2, base * 4, device),
            block4: ConvBlock::new(base * 4, base * 8, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        self.block4.forward(x)
    }
}

/// Backbone, global average pool and classification head
#[derive(Module, Debug)]
pub struct WsiClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    pub relu: Relu,
    pub fc2: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> WsiClassifier<B> {
    pub fn new(config: &WsiClassifierConfig, device: &B::Device) -> Self {
        let features = config.base_filters * 8;
        Self {
            backbone: Backbone::new(config.in_channels, config.base_filters, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(features, config.hidden_size).init(device),
            relu: Relu::new(),
            fc2: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Logits of shape `[batch_size, num_classes]` for `[batch_size, C, H, W]` input
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(x);
        let x = self.global_pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Builds the classifier for inputs of `input` dimensions.
///
/// `backbone_weights` is a burn `CompactRecorder` file holding a
/// [`Backbone`] record. The returned backbone never receives gradients.
pub fn build_classifier<B: Backend>(
    config: &WsiClassifierConfig,
    input: ImageDimensions,
    backbone_weights: Option<&Path>,
    device: &B::Device,
) -> wsi_core::Result<WsiClassifier<B>> {
    if config.num_classes == 0 {
        return Err(Error::Model("classifier needs at least one class".to_string()));
    }
    if input.channels as usize != config.in_channels {
        return Err(Error::Model(format!(
            "input has {} channels, classifier expects {}",
            input.channels, config.in_channels
        )));
    }
    let min_side = 1 << BACKBONE_BLOCKS;
    if input.height < min_side || input.width < min_side {
        return Err(Error::Model(format!(
            "input {}x{} is smaller than the {}x{} minimum",
            input.height, input.width, min_side, min_side
        )));
    }

    let mut model = WsiClassifier::new(config, device);

    if let Some(path) = backbone_weights {
        info!("Loading backbone weights from {}", path.display());
        model.backbone = model
            .backbone
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| {
                Error::Model(format!("Failed to load backbone {}: {:?}", path.display(), e))
            })?;
    }

    model.backbone = model.backbone.no_grad();

    info!(
        "Built classifier for {}x{}x{} input, {} classes",
        input.height, input.width, input.channels, config.num_classes
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_config(num_classes: usize) -> WsiClassifierConfig {
        WsiClassifierConfig::new(num_classes)
            .with_base_filters(4)
            .with_hidden_size(8)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = build_classifier::<TestBackend>(
            &small_config(3),
            ImageDimensions::new(32, 32, 3),
            None,
            &device,
        )
        .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input.clone()).dims(), [2, 3]);

        let probs: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();
        for row in probs.chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let device = Default::default();
        assert!(build_classifier::<TestBackend>(
            &small_config(2),
            ImageDimensions::new(8, 32, 3),
            None,
            &device
        )
        .is_err());
        assert!(build_classifier::<TestBackend>(
            &small_config(2),
            ImageDimensions::new(32, 32, 1),
            None,
            &device
        )
        .is_err());
        assert!(build_classifier::<TestBackend>(
            &small_config(0),
            ImageDimensions::new(32, 32, 3),
            None,
            &device
        )
        .is_err());
    }

    #[test]
    fn test_loads_backbone_record() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backbone");

        let pretrained = Backbone::<TestBackend>::new(3, 4, &device);
        let reference: Vec<f32> = pretrained.block1.conv.weight.val().into_data().to_vec().unwrap();
        pretrained.save_file(&path, &CompactRecorder::new()).unwrap();

        let model = build_classifier::<TestBackend>(
            &small_config(2),
            ImageDimensions::new(16, 16, 3),
            Some(&path),
            &device,
        )
        .unwrap();
        let loaded: Vec<f32> =
            model.backbone.block1.conv.weight.val().into_data().to_vec().unwrap();
        // CompactRecorder stores half precision.
        assert_eq!(loaded.len(), reference.len());
        for (a, b) in loaded.iter().zip(&reference) {
            assert!((a - b).abs() <= 1e-2 * b.abs().max(1.0), "{} vs {}", a, b);
        }

        let input = Tensor::<TestBackend, 4>::from_floats(
            TensorData::new(vec![0.5f32; 768], [1, 3, 16, 16]),
            &device,
        );
        assert_eq!(model.forward(input).dims(), [1, 2]);
    }
}
