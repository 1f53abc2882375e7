//! Per-batch forward pass and composite loss

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use super::batch::{GraphTensors, IoSupervision};
use crate::dataset::HostTensor;
use crate::model::{
    preprocess, ArchHyperparams, ForwardOutput, GraphModel, IoLoss, ModelConfig, PrepMethod,
    VaeReconstructionLoss, LABELED_ARITY, UNLABELED_ARITY,
};
use crate::utils::error::{InfoNasError, Result};
use crate::utils::metrics::{EmbeddingHistory, LossCategory, LossHistory};

/// Forward output with reconstruction and inputs mapped back to DAG space
#[derive(Debug, Clone)]
pub struct Reconstruction<B: Backend> {
    pub ops: Tensor<B, 3>,
    pub adj: Tensor<B, 3>,
    pub target_ops: Tensor<B, 3>,
    pub target_adj: Tensor<B, 3>,
    pub output: ForwardOutput<B>,
}

/// Evaluates one batch against one model variant
#[derive(Debug, Clone, Copy)]
pub struct BatchEvaluator {
    prep: PrepMethod,
    vae_loss: VaeReconstructionLoss,
    io_loss: IoLoss,
}

impl BatchEvaluator {
    pub fn new(prep: PrepMethod, vae_loss: VaeReconstructionLoss, io_loss: IoLoss) -> Self {
        Self {
            prep,
            vae_loss,
            io_loss,
        }
    }

    /// Preprocessing and losses selected by a model configuration
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let arch = ArchHyperparams::lookup(config.arch2vec_config)?;
        Ok(Self::new(arch.prep, arch.loss.into(), IoLoss::new(config.loss)))
    }

    /// Preprocess, forward and reverse. With `io` the model must return the
    /// labeled output, otherwise the unlabeled one.
    pub fn reconstruct<B: Backend, M: GraphModel<B>>(
        &self,
        model: &M,
        graph: &GraphTensors<B>,
        io: Option<&IoSupervision<B>>,
    ) -> Result<Reconstruction<B>> {
        let (adj, ops, reverse) = preprocess(graph.adjacency.clone(), graph.operations.clone(), self.prep);
        let output = model.forward_graph(ops.clone(), adj.clone(), io.map(|s| s.inputs.clone()));

        let expected = if io.is_some() { LABELED_ARITY } else { UNLABELED_ARITY };
        if output.arity() != expected {
            return Err(InfoNasError::ModelOutputArity {
                expected,
                actual: output.arity(),
            });
        }

        let recon = output.graph();
        let (adj_recon, ops_recon) = reverse.reverse(recon.adj_recon.clone(), recon.ops_recon.clone());
        let (target_adj, target_ops) = reverse.reverse(adj, ops);

        Ok(Reconstruction {
            ops: ops_recon,
            adj: adj_recon,
            target_ops,
            target_adj,
            output,
        })
    }

    /// Composite loss of one batch, ready for backpropagation.
    ///
    /// Records `unlabeled`, `labeled` (when supervised) and `total` losses and
    /// the batch's latent means.
    pub fn eval_batch<B: Backend, M: GraphModel<B>>(
        &self,
        model: &M,
        graph: &GraphTensors<B>,
        io: Option<&IoSupervision<B>>,
        losses: &mut LossHistory,
        embeddings: &mut EmbeddingHistory,
    ) -> Result<Tensor<B, 1>> {
        let r = self.reconstruct(model, graph, io)?;
        self.reconstruction_loss(&r, io, losses, embeddings)
    }

    /// Composite loss of an already computed reconstruction
    pub fn reconstruction_loss<B: Backend>(
        &self,
        r: &Reconstruction<B>,
        io: Option<&IoSupervision<B>>,
        losses: &mut LossHistory,
        embeddings: &mut EmbeddingHistory,
    ) -> Result<Tensor<B, 1>> {
        let latent = r.output.graph();
        embeddings.push(HostTensor::from_tensor(latent.mu.clone())?);

        let unlabeled = self.vae_loss.forward(
            (r.ops.clone(), r.adj.clone()),
            (r.target_ops.clone(), r.target_adj.clone()),
            latent.mu.clone(),
            latent.logvar.clone(),
        );
        losses.record(LossCategory::Unlabeled, scalar(&unlabeled));

        let total = match (io, r.output.io_recon()) {
            (Some(supervision), Some(io_recon)) => {
                let labeled = self.io_loss.forward(io_recon.clone(), supervision.outputs.clone());
                losses.record(LossCategory::Labeled, scalar(&labeled));
                unlabeled + labeled
            }
            _ => unlabeled,
        };
        losses.record(LossCategory::Total, scalar(&total));
        Ok(total)
    }
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::IoLossKind;
    use crate::model::{ConcatIoModelConfig, GraphReconstruction, GraphVae, GraphVaeConfig};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn evaluator() -> BatchEvaluator {
        BatchEvaluator::new(
            PrepMethod::Undirected,
            VaeReconstructionLoss { w_ops: 1.0, w_adj: 1.0 },
            IoLoss::new(IoLossKind::Mse),
        )
    }

    fn vae() -> GraphVae<TestBackend> {
        GraphVaeConfig::new(5)
            .with_hidden_dim(8)
            .with_latent_dim(4)
            .with_num_layers(1)
            .init(&Default::default())
    }

    fn graph() -> GraphTensors<TestBackend> {
        let device = Default::default();
        GraphTensors {
            adjacency: Tensor::zeros([2, 7, 7], &device),
            operations: Tensor::ones([2, 7, 5], &device),
        }
    }

    fn io() -> IoSupervision<TestBackend> {
        let device = Default::default();
        IoSupervision {
            inputs: Tensor::ones([2, 3, 4, 4], &device),
            outputs: Tensor::zeros([2, 2, 2, 2], &device),
        }
    }

    #[test]
    fn test_unlabeled_batch_records_two_categories() {
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        let loss = evaluator()
            .eval_batch(&vae(), &graph(), None, &mut losses, &mut embeddings)
            .unwrap();

        assert_eq!(losses.values(LossCategory::Total).len(), 1);
        assert_eq!(losses.values(LossCategory::Unlabeled).len(), 1);
        assert!(losses.values(LossCategory::Labeled).is_empty());
        assert_eq!(embeddings.len(), 1);
        assert!((scalar(&loss) - losses.values(LossCategory::Total)[0]).abs() < 1e-6);
    }

    #[test]
    fn test_labeled_batch_sums_components() {
        let model = ConcatIoModelConfig::new(3, 2, [2, 2])
            .with_hidden_channels(4)
            .init(vae(), &Default::default());
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        evaluator()
            .eval_batch(&model, &graph(), Some(&io()), &mut losses, &mut embeddings)
            .unwrap();

        let total = losses.values(LossCategory::Total)[0];
        let parts = losses.values(LossCategory::Unlabeled)[0] + losses.values(LossCategory::Labeled)[0];
        assert!((total - parts).abs() < 1e-4);
    }

    #[test]
    fn test_plain_model_with_supervision_violates_arity() {
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        let result = evaluator().eval_batch(&vae(), &graph(), Some(&io()), &mut losses, &mut embeddings);
        assert!(matches!(
            result,
            Err(InfoNasError::ModelOutputArity { expected: 6, actual: 4 })
        ));
        assert!(losses.is_empty());
    }

    /// Always returns the labeled output, even without IO input
    struct AlwaysExtended;

    impl GraphModel<TestBackend> for AlwaysExtended {
        fn forward_graph(
            &self,
            ops: Tensor<TestBackend, 3>,
            adj: Tensor<TestBackend, 3>,
            _io_input: Option<Tensor<TestBackend, 4>>,
        ) -> ForwardOutput<TestBackend> {
            let device = ops.device();
            let [n, v, _] = ops.dims();
            ForwardOutput::Extended {
                graph: GraphReconstruction {
                    ops_recon: ops,
                    adj_recon: adj,
                    mu: Tensor::zeros([n, v, 2], &device),
                    logvar: Tensor::zeros([n, v, 2], &device),
                },
                z: Tensor::zeros([n, v, 2], &device),
                io_recon: Tensor::zeros([n, 1, 1, 1], &device),
            }
        }
    }

    #[test]
    fn test_unlabeled_contract_is_checked_too() {
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        let result = evaluator().eval_batch(&AlwaysExtended, &graph(), None, &mut losses, &mut embeddings);
        assert!(matches!(
            result,
            Err(InfoNasError::ModelOutputArity { expected: 4, actual: 6 })
        ));
    }

    #[test]
    fn test_loss_of_existing_reconstruction_matches_eval_batch() {
        let model = vae();
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        let direct = evaluator()
            .eval_batch(&model, &graph(), None, &mut losses, &mut embeddings)
            .unwrap();

        let r = evaluator().reconstruct(&model, &graph(), None).unwrap();
        let reused = evaluator()
            .reconstruction_loss(&r, None, &mut losses, &mut embeddings)
            .unwrap();
        assert!((scalar(&direct) - scalar(&reused)).abs() < 1e-6);
        assert_eq!(losses.values(LossCategory::Total).len(), 2);
    }

    #[test]
    fn test_targets_are_reversed_to_dag_space() {
        let device = Default::default();
        let mut adjacency = vec![0.0f32; 49];
        adjacency[1] = 1.0; // edge 0 -> 1
        let graph = GraphTensors::<TestBackend> {
            adjacency: Tensor::from_data(burn::tensor::TensorData::new(adjacency.clone(), [1, 7, 7]), &device),
            operations: Tensor::ones([1, 7, 5], &device),
        };
        let r = evaluator().reconstruct(&vae(), &graph, None).unwrap();
        assert_eq!(r.target_adj.into_data().to_vec::<f32>().unwrap(), adjacency);
    }
}
