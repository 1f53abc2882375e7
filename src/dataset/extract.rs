//! Network output extraction
//!
//! Runs one pretrained candidate network over the validation stream and
//! records the input of layer `nth_input` and the output of layer
//! `nth_output` for every example. Call it with a non-autodiff backend; the
//! network is never updated.

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::host::HostTensor;
use super::validation::ValidationBatch;
use crate::model::config::IoConfig;
use crate::nasbench::CandidateNetwork;
use crate::utils::error::{InfoNasError, Result};

/// Classification loss used for extraction diagnostics
pub type ClassificationLoss<'a, B> = &'a dyn Fn(Tensor<B, 2>, Tensor<B, 1, Int>) -> Tensor<B, 1>;

/// Selected layer inputs of an extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectedInputs {
    /// Global example indices into the raw validation images
    Reference(Vec<i64>),
    /// Intermediate activations
    Activations(HostTensor),
}

impl SelectedInputs {
    pub fn len(&self) -> usize {
        match self {
            SelectedInputs::Reference(indices) => indices.len(),
            SelectedInputs::Activations(t) => t.rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, SelectedInputs::Reference(_))
    }

    /// Concatenate in order; all parts must be of the same kind
    pub fn concat(parts: Vec<SelectedInputs>) -> Result<Self> {
        if parts.iter().all(|p| p.is_reference()) {
            let indices = parts
                .into_iter()
                .flat_map(|p| match p {
                    SelectedInputs::Reference(indices) => indices,
                    SelectedInputs::Activations(_) => Vec::new(),
                })
                .collect();
            return Ok(SelectedInputs::Reference(indices));
        }

        let mut tensors = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                SelectedInputs::Activations(t) => tensors.push(t),
                SelectedInputs::Reference(_) => {
                    return Err(InfoNasError::Dataset(
                        "cannot mix reference indices with activations".to_string(),
                    ))
                }
            }
        }
        Ok(SelectedInputs::Activations(HostTensor::concat(&tensors)?))
    }

    /// Reorder by `permutation`
    pub fn permute(&self, permutation: &[usize]) -> Result<Self> {
        match self {
            SelectedInputs::Reference(indices) => permutation
                .iter()
                .map(|&i| {
                    indices.get(i).copied().ok_or(InfoNasError::IndexOutOfRange {
                        kind: "record",
                        index: i as isize,
                        len: indices.len(),
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(SelectedInputs::Reference),
            SelectedInputs::Activations(t) => Ok(SelectedInputs::Activations(t.select_rows(permutation)?)),
        }
    }
}

/// Everything recorded for one network
#[derive(Debug, Clone)]
pub struct NetOutputs {
    pub inputs: SelectedInputs,
    pub outputs: HostTensor,
    /// Mean loss per batch, infinite for an empty stream
    pub mean_loss: f64,
    pub accuracy: f64,
}

/// Resolve a possibly negative layer index against a layer list of `len`
pub fn resolve_layer_index(kind: &'static str, index: isize, len: usize) -> Result<usize> {
    let resolved = if index < 0 { len as isize + index } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(InfoNasError::IndexOutOfRange { kind, index, len });
    }
    Ok(resolved as usize)
}

/// Run `net` over `batches` and record the selected layer inputs and outputs.
///
/// When `io.nth_input == 0` the raw images are replaced by their global
/// example index, `batch_idx * first_batch_len + position`. Accuracy is
/// normalised by `num_data` when given, otherwise by the number of examples
/// seen.
pub fn get_net_outputs<B: Backend, N: CandidateNetwork<B>>(
    net: &N,
    batches: &[ValidationBatch<B>],
    io: &IoConfig,
    loss_fn: Option<ClassificationLoss<'_, B>>,
    num_data: Option<usize>,
) -> Result<NetOutputs> {
    let Some(first) = batches.first() else {
        warn!("Empty validation stream, reporting infinite loss");
        let inputs = if io.uses_reference_inputs() {
            SelectedInputs::Reference(Vec::new())
        } else {
            SelectedInputs::Activations(HostTensor::new(vec![0], Vec::new())?)
        };
        return Ok(NetOutputs {
            inputs,
            outputs: HostTensor::new(vec![0], Vec::new())?,
            mean_loss: f64::INFINITY,
            accuracy: 0.0,
        });
    };

    let batch_size = first.len();
    let default_loss = CrossEntropyLossConfig::new().init(&first.images.device());

    let mut total_loss = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;
    let mut inputs = Vec::with_capacity(batches.len());
    let mut outputs = Vec::with_capacity(batches.len());

    for (batch_idx, batch) in batches.iter().enumerate() {
        let logits = net.forward(batch.images.clone());
        let loss = match loss_fn {
            Some(f) => f(logits.clone(), batch.targets.clone()),
            None => default_loss.forward(logits.clone(), batch.targets.clone()),
        };
        let loss_value: f64 = loss.into_scalar().elem();
        total_loss += loss_value;

        let batch_correct: i64 = logits
            .argmax(1)
            .squeeze::<1>(1)
            .equal(batch.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += batch_correct as usize;

        let len = batch.len();
        seen += len;

        let layers = net.layer_io(batch.images.clone());
        let out_idx = resolve_layer_index("nth_output", io.nth_output, layers.outputs.len())?;
        outputs.push(HostTensor::from_tensor(layers.outputs[out_idx].clone())?);

        if io.uses_reference_inputs() {
            let offset = (batch_idx * batch_size) as i64;
            inputs.push(SelectedInputs::Reference(
                (0..len as i64).map(|i| i + offset).collect(),
            ));
        } else {
            let in_idx = resolve_layer_index("nth_input", io.nth_input, layers.inputs.len())?;
            inputs.push(SelectedInputs::Activations(HostTensor::from_tensor(
                layers.inputs[in_idx].clone(),
            )?));
        }
    }

    let normaliser = num_data.unwrap_or(seen);
    let accuracy = if normaliser == 0 {
        0.0
    } else {
        correct as f64 / normaliser as f64
    };
    let mean_loss = total_loss / batches.len() as f64;
    debug!(
        "Extracted {} examples: loss = {:.4}, acc = {:.2}%",
        seen,
        mean_loss,
        100.0 * accuracy
    );

    Ok(NetOutputs {
        inputs: SelectedInputs::concat(inputs)?,
        outputs: HostTensor::concat(&outputs)?,
        mean_loss,
        accuracy,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::ValidationSet;
    use crate::nasbench::LayerIo;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    /// Two-layer network whose activations carry `tag` and the example value:
    /// layer 0 adds `tag`, layer 1 doubles. Logits always predict class 0.
    pub(crate) struct TaggedNet {
        pub tag: f32,
    }

    impl<B: Backend> CandidateNetwork<B> for TaggedNet {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let n = images.dims()[0];
            let values: Vec<f32> = (0..n).flat_map(|_| [1.0f32, 0.0]).collect();
            Tensor::from_data(TensorData::new(values, [n, 2]), &images.device())
        }

        fn layer_io(&self, images: Tensor<B, 4>) -> LayerIo<B> {
            let first = images.clone().add_scalar(self.tag);
            let second = first.clone().mul_scalar(2.0);
            LayerIo {
                inputs: vec![images, first.clone()],
                outputs: vec![first, second],
            }
        }
    }

    /// `n` single-pixel images whose value is their example index
    pub(crate) fn indexed_set(n: usize) -> ValidationSet {
        let images = HostTensor::new(vec![n, 1, 1, 1], (0..n).map(|v| v as f32).collect()).unwrap();
        ValidationSet::new(images, (0..n as i64).map(|i| i % 2).collect()).unwrap()
    }

    #[test]
    fn test_reference_indices_follow_batches() {
        let set = indexed_set(10);
        let batches = set.batches::<TestBackend>(4, &Default::default()).unwrap();
        let out = get_net_outputs(&TaggedNet { tag: 100.0 }, &batches, &IoConfig::new(0, -1), None, None).unwrap();

        assert_eq!(out.inputs, SelectedInputs::Reference((0..10).collect()));
        assert_eq!(out.outputs.shape, vec![10, 1, 1, 1]);
        assert_eq!(out.outputs.values[3], 2.0 * 103.0);
        // labels alternate 0/1 and the net always predicts 0
        assert!((out.accuracy - 0.5).abs() < 1e-9);
        assert!(out.mean_loss.is_finite());
    }

    #[test]
    fn test_activation_inputs_and_negative_output_index() {
        let set = indexed_set(3);
        let batches = set.batches::<TestBackend>(2, &Default::default()).unwrap();
        let out = get_net_outputs(&TaggedNet { tag: 10.0 }, &batches, &IoConfig::new(1, -2), None, None).unwrap();

        match &out.inputs {
            SelectedInputs::Activations(t) => assert_eq!(t.values, vec![10.0, 11.0, 12.0]),
            other => panic!("expected activations, got {:?}", other),
        }
        // -2 selects the first layer's output
        assert_eq!(out.outputs.values, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let set = indexed_set(2);
        let batches = set.batches::<TestBackend>(2, &Default::default()).unwrap();
        let result = get_net_outputs(&TaggedNet { tag: 0.0 }, &batches, &IoConfig::new(0, -3), None, None);
        assert!(matches!(
            result,
            Err(InfoNasError::IndexOutOfRange { kind: "nth_output", index: -3, len: 2 })
        ));

        let result = get_net_outputs(&TaggedNet { tag: 0.0 }, &batches, &IoConfig::new(2, -1), None, None);
        assert!(matches!(result, Err(InfoNasError::IndexOutOfRange { kind: "nth_input", .. })));
    }

    #[test]
    fn test_empty_stream_reports_infinite_loss() {
        let batches: Vec<ValidationBatch<TestBackend>> = Vec::new();
        let out = get_net_outputs(&TaggedNet { tag: 0.0 }, &batches, &IoConfig::new(0, -1), None, None).unwrap();
        assert!(out.mean_loss.is_infinite());
        assert!(out.inputs.is_empty());
    }

    #[test]
    fn test_custom_loss_and_normalisation() {
        let set = indexed_set(4);
        let batches = set.batches::<TestBackend>(4, &Default::default()).unwrap();
        let zero_loss = |logits: Tensor<TestBackend, 2>, _t: Tensor<TestBackend, 1, Int>| {
            logits.sum().mul_scalar(0.0)
        };
        let out = get_net_outputs(
            &TaggedNet { tag: 0.0 },
            &batches,
            &IoConfig::new(0, -1),
            Some(&zero_loss),
            Some(8),
        )
        .unwrap();
        assert_eq!(out.mean_loss, 0.0);
        assert!((out.accuracy - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_layer_index() {
        assert_eq!(resolve_layer_index("nth_output", -1, 4).unwrap(), 3);
        assert_eq!(resolve_layer_index("nth_output", 0, 4).unwrap(), 0);
        assert!(resolve_layer_index("nth_output", 4, 4).is_err());
        assert!(resolve_layer_index("nth_output", -5, 4).is_err());
    }
}
