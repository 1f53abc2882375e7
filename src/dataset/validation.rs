//! Image/label streams consumed by candidate networks

use std::fs;
use std::path::Path;

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use serde::{Deserialize, Serialize};

use super::host::HostTensor;
use crate::utils::error::{InfoNasError, Result};

/// One batch of images `[N, C, H, W]` and class targets `[N]`
#[derive(Clone, Debug)]
pub struct ValidationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ValidationBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A finite, ordered image dataset held in host memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSet {
    pub images: HostTensor,
    pub labels: Vec<i64>,
}

impl ValidationSet {
    pub fn new(images: HostTensor, labels: Vec<i64>) -> Result<Self> {
        if images.shape.len() != 4 {
            return Err(InfoNasError::Dataset(format!(
                "images must be [N, C, H, W], got {:?}",
                images.shape
            )));
        }
        if images.rows() != labels.len() {
            return Err(InfoNasError::ShapeMismatch {
                context: "validation images vs labels".to_string(),
                expected: images.rows(),
                actual: labels.len(),
            });
        }
        Ok(Self { images, labels })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(InfoNasError::PathNotFound(path.to_path_buf()));
        }
        let set: ValidationSet = serde_json::from_str(&fs::read_to_string(path)?)?;
        Self::new(set.images, set.labels)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// First `n` examples
    pub fn truncate(&self, n: usize) -> Result<Self> {
        let n = n.min(self.len());
        let indices: Vec<usize> = (0..n).collect();
        Self::new(self.images.select_rows(&indices)?, self.labels[..n].to_vec())
    }

    /// Ordered batches on `device`; the last batch may be smaller
    pub fn batches<B: Backend>(
        &self,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<Vec<ValidationBatch<B>>> {
        if batch_size == 0 {
            return Err(InfoNasError::Config("batch size must be positive".to_string()));
        }
        let indices: Vec<usize> = (0..self.len()).collect();
        indices
            .chunks(batch_size)
            .map(|chunk| {
                let images = self.images.select_rows(chunk)?.to_tensor::<B, 4>(device)?;
                let labels: Vec<i64> = chunk.iter().map(|&i| self.labels[i]).collect();
                let targets =
                    Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [chunk.len()]), device);
                Ok(ValidationBatch { images, targets })
            })
            .collect()
    }
}
