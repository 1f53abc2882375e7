//! Host-side tensors
//!
//! Extracted activations leave the device as [`HostTensor`]s so that the IO
//! dataset can be permuted, persisted and compared without a backend.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::utils::error::{InfoNasError, Result};

/// Row-major float tensor living in host memory. Dimension 0 indexes records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl HostTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(InfoNasError::ShapeMismatch {
                context: format!("host tensor of shape {:?}", shape),
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Copy a device tensor to the host
    pub fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| InfoNasError::Dataset(format!("tensor readback failed: {:?}", e)))?;
        Self::new(shape, values)
    }

    /// Upload to a device. `D` must equal the stored rank.
    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Result<Tensor<B, D>> {
        if self.shape.len() != D {
            return Err(InfoNasError::ShapeMismatch {
                context: "host tensor rank".to_string(),
                expected: D,
                actual: self.shape.len(),
            });
        }
        let data = TensorData::new(self.values.clone(), self.shape.clone());
        Ok(Tensor::from_data(data, device))
    }

    /// Number of records (size of dimension 0)
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of scalars in one record
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let len = self.row_len();
        &self.values[index * len..(index + 1) * len]
    }

    /// Gather rows in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let rows = self.rows();
        let len = self.row_len();
        let mut values = Vec::with_capacity(indices.len() * len);
        for &i in indices {
            if i >= rows {
                return Err(InfoNasError::IndexOutOfRange {
                    kind: "row",
                    index: i as isize,
                    len: rows,
                });
            }
            values.extend_from_slice(self.row(i));
        }
        let mut shape = self.shape.clone();
        shape[0] = indices.len();
        Self::new(shape, values)
    }

    /// Concatenate along dimension 0; trailing dimensions must agree
    pub fn concat(parts: &[HostTensor]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| InfoNasError::Dataset("cannot concatenate zero tensors".to_string()))?;
        let trailing = &first.shape[1..];
        let mut values = Vec::new();
        let mut rows = 0;
        for part in parts {
            if part.shape.len() != first.shape.len() || &part.shape[1..] != trailing {
                return Err(InfoNasError::ShapeMismatch {
                    context: format!(
                        "concatenating {:?} onto records of shape {:?}",
                        part.shape, trailing
                    ),
                    expected: first.row_len(),
                    actual: part.row_len(),
                });
            }
            rows += part.rows();
            values.extend_from_slice(&part.values);
        }
        let mut shape = first.shape.clone();
        shape[0] = rows;
        Self::new(shape, values)
    }
}
