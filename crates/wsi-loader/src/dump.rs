//! JSON dumps of an assembled batch for offline inspection.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wsi_core::{Error, Result};

use crate::sequence::Batch;

pub const X_BATCH_FILE: &str = "x_batch.json";
pub const Y_BATCH_FILE: &str = "y_batch.json";

/// Dense array with its shape, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpedArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Writes `x_batch.json` (`[N, C, H, W]`) and `y_batch.json` (`[N, classes]`)
#[derive(Debug, Clone)]
pub struct BatchDumper {
    dir: PathBuf,
}

impl BatchDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrites both dump files, returning their paths
    pub fn dump(&self, batch: &Batch) -> Result<(PathBuf, PathBuf)> {
        let (x, y) = arrays(batch)?;

        fs::create_dir_all(&self.dir)?;
        let x_path = self.dir.join(X_BATCH_FILE);
        let y_path = self.dir.join(Y_BATCH_FILE);
        fs::write(&x_path, serde_json::to_vec(&x)?)?;
        fs::write(&y_path, serde_json::to_vec(&y)?)?;

        Ok((x_path, y_path))
    }

    pub fn load(path: &Path) -> Result<DumpedArray> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn arrays(batch: &Batch) -> Result<(DumpedArray, DumpedArray)> {
    let (shape, num_classes) = match (batch.image_shape(), batch.num_classes()) {
        (Some(shape), Some(classes)) => (shape, classes),
        _ => return Err(Error::InvalidArgument("cannot dump an empty batch".to_string())),
    };

    if batch.images.iter().any(|image| image.shape != shape) {
        return Err(Error::InvalidArgument("batch images differ in shape".to_string()));
    }
    if batch.labels.iter().any(|label| label.len() != num_classes) {
        return Err(Error::InvalidArgument("batch labels differ in length".to_string()));
    }

    let x = DumpedArray {
        shape: vec![batch.len(), shape[0], shape[1], shape[2]],
        data: batch.images.iter().flat_map(|image| image.data.iter().copied()).collect(),
    };
    let y = DumpedArray {
        shape: vec![batch.len(), num_classes],
        data: batch.labels.iter().flatten().copied().collect(),
    };
    Ok((x, y))
}
