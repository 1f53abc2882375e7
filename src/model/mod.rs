//! Graph autoencoder models, their losses, preprocessing and configuration
//!
//! Two forward contracts exist and both are checked by the batch evaluator:
//! - unlabeled: 4 outputs `(ops_recon, adj_recon, mu, logvar)`
//! - labeled: 6 outputs, the 4 above plus `z` and the IO reconstruction

pub mod config;
pub mod io_model;
pub mod loss;
pub mod preprocessing;
pub mod vae;

use burn::tensor::{backend::Backend, Tensor};

pub use config::{ArchHyperparams, ConfigSource, IoConfig, ModelClass, ModelConfig, TrainOptions};
pub use io_model::{ConcatIoModel, ConcatIoModelConfig};
pub use loss::{IoLoss, VaeReconstructionLoss};
pub use preprocessing::{preprocess, PrepMethod, PrepReverse};
pub use vae::{GraphVae, GraphVaeConfig};

/// Output arity of a forward pass without IO supervision
pub const UNLABELED_ARITY: usize = 4;

/// Output arity of a label-extended forward pass
pub const LABELED_ARITY: usize = 6;

/// Decoded graph and latent distribution of one batch
#[derive(Debug, Clone)]
pub struct GraphReconstruction<B: Backend> {
    pub ops_recon: Tensor<B, 3>,
    pub adj_recon: Tensor<B, 3>,
    pub mu: Tensor<B, 3>,
    pub logvar: Tensor<B, 3>,
}

/// Result of a model forward pass
#[derive(Debug, Clone)]
pub enum ForwardOutput<B: Backend> {
    Graph(GraphReconstruction<B>),
    Extended {
        graph: GraphReconstruction<B>,
        z: Tensor<B, 3>,
        io_recon: Tensor<B, 4>,
    },
}

impl<B: Backend> ForwardOutput<B> {
    /// Number of tensors carried by the output
    pub fn arity(&self) -> usize {
        match self {
            ForwardOutput::Graph(_) => UNLABELED_ARITY,
            ForwardOutput::Extended { .. } => LABELED_ARITY,
        }
    }

    pub fn graph(&self) -> &GraphReconstruction<B> {
        match self {
            ForwardOutput::Graph(graph) => graph,
            ForwardOutput::Extended { graph, .. } => graph,
        }
    }

    /// The IO reconstruction, last element of the labeled output
    pub fn io_recon(&self) -> Option<&Tensor<B, 4>> {
        match self {
            ForwardOutput::Graph(_) => None,
            ForwardOutput::Extended { io_recon, .. } => Some(io_recon),
        }
    }
}

/// A model trained by the semi-supervised orchestrator
pub trait GraphModel<B: Backend> {
    /// Forward one batch of `[N, V, O]` operations and `[N, V, V]` adjacency.
    /// Label-extended models additionally consume the selected input activation.
    fn forward_graph(
        &self,
        ops: Tensor<B, 3>,
        adj: Tensor<B, 3>,
        io_input: Option<Tensor<B, 4>>,
    ) -> ForwardOutput<B>;
}
