//! Training batches and their routing
//!
//! Data loaders emit [`RawBatch`]es: two graph tensors plus any extra tensors.
//! [`BatchRouter`] turns them into the tagged [`Batch`] the orchestrator
//! matches on, so arity checks happen once at the loading boundary.

use burn::tensor::{backend::Backend, Tensor};
use rand_chacha::ChaCha8Rng;

use crate::utils::error::{InfoNasError, Result};

/// Arity of a graph-only batch
pub const UNLABELED_BATCH_LEN: usize = 2;

/// Padded adjacency `[N, V, V]` and one-hot operations `[N, V, O]`
#[derive(Debug, Clone)]
pub struct GraphTensors<B: Backend> {
    pub adjacency: Tensor<B, 3>,
    pub operations: Tensor<B, 3>,
}

impl<B: Backend> GraphTensors<B> {
    pub fn len(&self) -> usize {
        self.adjacency.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Selected input and output activations of the networks in a batch
#[derive(Debug, Clone)]
pub struct IoSupervision<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub outputs: Tensor<B, 4>,
}

#[derive(Debug, Clone)]
pub enum Batch<B: Backend> {
    Unlabeled(GraphTensors<B>),
    Labeled {
        graph: GraphTensors<B>,
        io: IoSupervision<B>,
    },
}

impl<B: Backend> Batch<B> {
    pub fn graph(&self) -> &GraphTensors<B> {
        match self {
            Batch::Unlabeled(graph) => graph,
            Batch::Labeled { graph, .. } => graph,
        }
    }

    pub fn io(&self) -> Option<&IoSupervision<B>> {
        match self {
            Batch::Unlabeled(_) => None,
            Batch::Labeled { io, .. } => Some(io),
        }
    }

    pub fn is_labeled(&self) -> bool {
        matches!(self, Batch::Labeled { .. })
    }
}

/// A batch as emitted by a loader, before classification
#[derive(Debug, Clone)]
pub struct RawBatch<B: Backend> {
    pub adjacency: Tensor<B, 3>,
    pub operations: Tensor<B, 3>,
    /// Selected input and output, plus any trailing tensors
    pub extras: Vec<Tensor<B, 4>>,
}

impl<B: Backend> RawBatch<B> {
    pub fn unlabeled(adjacency: Tensor<B, 3>, operations: Tensor<B, 3>) -> Self {
        Self {
            adjacency,
            operations,
            extras: Vec::new(),
        }
    }

    pub fn labeled(
        adjacency: Tensor<B, 3>,
        operations: Tensor<B, 3>,
        inputs: Tensor<B, 4>,
        outputs: Tensor<B, 4>,
    ) -> Self {
        Self {
            adjacency,
            operations,
            extras: vec![inputs, outputs],
        }
    }

    /// Number of tensors in the batch
    pub fn arity(&self) -> usize {
        UNLABELED_BATCH_LEN + self.extras.len()
    }
}

/// Restartable producer of training batches
pub trait BatchSource<B: Backend> {
    /// Batches of one epoch in training order. Any shuffling draws from `rng`.
    fn epoch_batches(&self, rng: &mut ChaCha8Rng, device: &B::Device) -> Result<Vec<RawBatch<B>>>;
}

/// A fixed batch list replayed every epoch
impl<B: Backend> BatchSource<B> for Vec<RawBatch<B>> {
    fn epoch_batches(&self, _rng: &mut ChaCha8Rng, _device: &B::Device) -> Result<Vec<RawBatch<B>>> {
        Ok(self.clone())
    }
}

/// Classifies raw batches by arity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRouter {
    labeled_len: usize,
}

impl BatchRouter {
    /// `labeled_len` counts every tensor of a labeled batch and must be at least 4
    pub fn new(labeled_len: usize) -> Result<Self> {
        if labeled_len < UNLABELED_BATCH_LEN + 2 {
            return Err(InfoNasError::Config(format!(
                "labeled batch length must be at least {}, got {}",
                UNLABELED_BATCH_LEN + 2,
                labeled_len
            )));
        }
        Ok(Self { labeled_len })
    }

    pub fn route<B: Backend>(&self, raw: RawBatch<B>) -> Result<Batch<B>> {
        let arity = raw.arity();
        let graph = GraphTensors {
            adjacency: raw.adjacency,
            operations: raw.operations,
        };

        if arity == UNLABELED_BATCH_LEN {
            return Ok(Batch::Unlabeled(graph));
        }
        if arity != self.labeled_len {
            return Err(InfoNasError::BatchArity {
                arity,
                labeled_len: self.labeled_len,
            });
        }

        let mut extras = raw.extras.into_iter();
        match (extras.next(), extras.next()) {
            (Some(inputs), Some(outputs)) => Ok(Batch::Labeled {
                graph,
                io: IoSupervision { inputs, outputs },
            }),
            _ => Err(InfoNasError::BatchArity {
                arity,
                labeled_len: self.labeled_len,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn raw(extras: usize) -> RawBatch<TestBackend> {
        let device = Default::default();
        RawBatch {
            adjacency: Tensor::zeros([2, 7, 7], &device),
            operations: Tensor::zeros([2, 7, 5], &device),
            extras: (0..extras).map(|_| Tensor::zeros([2, 1, 2, 2], &device)).collect(),
        }
    }

    #[test]
    fn test_routes_by_arity() {
        let router = BatchRouter::new(4).unwrap();
        let batch = router.route(raw(0)).unwrap();
        assert!(!batch.is_labeled());
        assert_eq!(batch.graph().len(), 2);

        let batch = router.route(raw(2)).unwrap();
        assert!(batch.is_labeled());
        assert!(batch.io().is_some());
    }

    #[test]
    fn test_unknown_arity_is_rejected() {
        let router = BatchRouter::new(4).unwrap();
        assert!(matches!(
            router.route(raw(1)),
            Err(InfoNasError::BatchArity { arity: 3, labeled_len: 4 })
        ));
        assert!(matches!(
            router.route(raw(3)),
            Err(InfoNasError::BatchArity { arity: 5, .. })
        ));
    }

    #[test]
    fn test_longer_labeled_batches() {
        let router = BatchRouter::new(5).unwrap();
        assert!(router.route(raw(3)).unwrap().is_labeled());
        assert!(router.route(raw(2)).is_err());
        assert!(BatchRouter::new(3).is_err());
    }
}
