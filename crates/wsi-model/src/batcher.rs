//! Conversion of loader batches into burn tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use wsi_core::{Error, Result};
use wsi_dataset::ImageTensor;
use wsi_loader::Batch;

/// One sample as the batcher consumes it: normalized image and one-hot label
#[derive(Clone, Debug)]
pub struct WsiItem {
    pub image: ImageTensor,
    pub label: Vec<f32>,
}

/// A batch of slides or patches for training
#[derive(Clone, Debug)]
pub struct WsiBatch<B: Backend> {
    /// `[batch_size, C, H, W]`
    pub images: Tensor<B, 4>,
    /// One-hot targets, `[batch_size, num_classes]`
    pub targets: Tensor<B, 2>,
}

/// Stacks items into tensors on a fixed device
#[derive(Clone, Debug)]
pub struct WsiBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> WsiBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Converts a loader batch, checking that every element has the same shape
    pub fn from_batch(&self, batch: &Batch) -> Result<WsiBatch<B>> {
        let (shape, num_classes) = match (batch.image_shape(), batch.num_classes()) {
            (Some(shape), Some(classes)) => (shape, classes),
            _ => return Err(Error::InvalidArgument("cannot batch zero items".to_string())),
        };
        if batch.images.iter().any(|image| image.shape != shape)
            || batch.labels.iter().any(|label| label.len() != num_classes)
        {
            return Err(Error::InvalidArgument("batch elements differ in shape".to_string()));
        }

        let items = batch
            .images
            .iter()
            .zip(&batch.labels)
            .map(|(image, label)| WsiItem {
                image: image.clone(),
                label: label.clone(),
            })
            .collect();
        Ok(self.batch(items))
    }
}

impl<B: Backend> Batcher<WsiItem, WsiBatch<B>> for WsiBatcher<B> {
    fn batch(&self, items: Vec<WsiItem>) -> WsiBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] =
            items.first().map(|item| item.image.shape).unwrap_or([3, 0, 0]);
        let num_classes = items.first().map(|item| item.label.len()).unwrap_or(0);

        let images_data: Vec<f32> =
            items.iter().flat_map(|item| item.image.data.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            &self.device,
        );

        let targets_data: Vec<f32> =
            items.iter().flat_map(|item| item.label.iter().copied()).collect();
        let targets = Tensor::<B, 2>::from_floats(
            TensorData::new(targets_data, [batch_size, num_classes]),
            &self.device,
        );

        WsiBatch { images, targets }
    }
}
