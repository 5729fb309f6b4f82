//! Classifier factory and burn integration for the WSI pipeline.

pub mod batcher;
pub mod classifier;
pub mod scorer;

pub use batcher::{WsiBatch, WsiBatcher, WsiItem};
pub use classifier::{build_classifier, Backbone, ConvBlock, WsiClassifier, WsiClassifierConfig};
pub use scorer::ModelScorer;
