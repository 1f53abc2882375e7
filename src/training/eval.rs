//! End-of-epoch evaluation
//!
//! Runs on the inner (non-autodiff) backend: no latent noise, no dropout.

use burn::{
    module::AutodiffModule,
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use tracing::info;

use super::batch::{Batch, BatchRouter, GraphTensors, IoSupervision};
use super::evaluator::{BatchEvaluator, Reconstruction};
use crate::dataset::semi::{unlabeled_batches, SemiSupervisedDataset};
use crate::model::{ConcatIoModel, GraphModel, GraphVae};
use crate::nasbench::GraphEncoding;
use crate::utils::error::Result;
use crate::utils::metrics::{
    mean, EmbeddingHistory, EpochMetrics, EpochStatistics, LossCategory, LossHistory, VariantTag,
};

/// Models and statistics at the end of an epoch
pub struct EvalContext<'a, B: AutodiffBackend> {
    pub epoch: usize,
    pub primary: &'a GraphVae<B>,
    pub labeled: &'a ConcatIoModel<B>,
    pub reference: Option<&'a GraphVae<B>>,
    pub statistics: &'a EpochStatistics,
}

pub trait EpochEvaluator<B: AutodiffBackend> {
    fn evaluate(&mut self, ctx: &EvalContext<'_, B>) -> Result<EpochMetrics>;
}

/// Records only the training statistics of the epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingStatistics;

impl<B: AutodiffBackend> EpochEvaluator<B> for TrainingStatistics {
    fn evaluate(&mut self, ctx: &EvalContext<'_, B>) -> Result<EpochMetrics> {
        let mut metrics = EpochMetrics::default();
        record_training_statistics(ctx.statistics, &mut metrics);
        Ok(metrics)
    }
}

fn record_training_statistics(statistics: &EpochStatistics, metrics: &mut EpochMetrics) {
    for (tag, losses) in &statistics.losses {
        if let Some(loss) = mean(losses.values(LossCategory::Total)) {
            metrics.insert(*tag, "train_loss", loss);
        }
    }
    for (tag, embeddings) in &statistics.embeddings {
        if let Some((z_mean, z_std)) = embeddings.summary() {
            metrics.insert(*tag, "z_mean", z_mean);
            metrics.insert(*tag, "z_std", z_std);
        }
    }
}

/// Held-out reconstruction and IO metrics of every variant
pub struct ValidationEvaluator<B: AutodiffBackend> {
    unlabeled: Vec<GraphTensors<B::InnerBackend>>,
    labeled: Vec<(GraphTensors<B::InnerBackend>, IoSupervision<B::InnerBackend>)>,
    evaluator: BatchEvaluator,
}

impl<B: AutodiffBackend> ValidationEvaluator<B> {
    pub fn new(
        unlabeled: &[GraphEncoding],
        labeled: Option<&SemiSupervisedDataset>,
        batch_size: usize,
        evaluator: BatchEvaluator,
        device: &B::Device,
    ) -> Result<Self> {
        let router = BatchRouter::new(4)?;
        let unlabeled = unlabeled_batches::<B::InnerBackend>(unlabeled, batch_size, device)?
            .into_iter()
            .map(|raw| GraphTensors {
                adjacency: raw.adjacency,
                operations: raw.operations,
            })
            .collect();

        let mut labeled_batches = Vec::new();
        if let Some(dataset) = labeled {
            for raw in dataset.labeled_batches::<B::InnerBackend>(device)? {
                if let Batch::Labeled { graph, io } = router.route(raw)? {
                    labeled_batches.push((graph, io));
                }
            }
        }

        Ok(Self {
            unlabeled,
            labeled: labeled_batches,
            evaluator,
        })
    }

    fn graph_metrics<M: GraphModel<B::InnerBackend>>(
        &self,
        tag: VariantTag,
        model: &M,
        metrics: &mut EpochMetrics,
    ) -> Result<()> {
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        let mut ops_acc = Vec::new();
        let mut adj_acc = Vec::new();

        for graph in &self.unlabeled {
            let r = self.evaluator.reconstruct(model, graph, None)?;
            self.evaluator
                .reconstruction_loss(&r, None, &mut losses, &mut embeddings)?;
            let (ops, adj) = reconstruction_accuracy(r);
            ops_acc.push(ops);
            adj_acc.push(adj);
        }

        if let Some(loss) = mean(losses.values(LossCategory::Total)) {
            metrics.insert(tag, "val_loss", loss);
        }
        if let (Some(ops), Some(adj)) = (mean(&ops_acc), mean(&adj_acc)) {
            metrics.insert(tag, "ops_acc", ops);
            metrics.insert(tag, "adj_acc", adj);
        }
        Ok(())
    }

    fn io_metrics(&self, model: &ConcatIoModel<B::InnerBackend>, metrics: &mut EpochMetrics) -> Result<()> {
        let mut losses = LossHistory::new();
        let mut embeddings = EmbeddingHistory::default();
        for (graph, io) in &self.labeled {
            self.evaluator
                .eval_batch(model, graph, Some(io), &mut losses, &mut embeddings)?;
        }
        if let Some(loss) = mean(losses.values(LossCategory::Labeled)) {
            metrics.insert(VariantTag::Labeled, "val_io_loss", loss);
        }
        Ok(())
    }
}

/// Fraction of vertices whose operation is recovered and of adjacency
/// entries recovered at threshold 0.5
fn reconstruction_accuracy<B: Backend>(r: Reconstruction<B>) -> (f64, f64) {
    let ops: f64 = r
        .ops
        .argmax(2)
        .equal(r.target_ops.argmax(2))
        .float()
        .mean()
        .into_scalar()
        .elem();
    let adj: f64 = r
        .adj
        .greater_elem(0.5)
        .float()
        .equal(r.target_adj)
        .float()
        .mean()
        .into_scalar()
        .elem();
    (ops, adj)
}

impl<B: AutodiffBackend> EpochEvaluator<B> for ValidationEvaluator<B> {
    fn evaluate(&mut self, ctx: &EvalContext<'_, B>) -> Result<EpochMetrics> {
        let mut metrics = EpochMetrics::default();
        record_training_statistics(ctx.statistics, &mut metrics);

        self.graph_metrics(VariantTag::Primary, &ctx.primary.valid(), &mut metrics)?;
        let labeled = ctx.labeled.valid();
        self.graph_metrics(VariantTag::Labeled, &labeled, &mut metrics)?;
        self.io_metrics(&labeled, &mut metrics)?;
        if let Some(reference) = ctx.reference {
            self.graph_metrics(VariantTag::Reference, &reference.valid(), &mut metrics)?;
        }

        for (tag, values) in &metrics.values {
            let summary: Vec<String> = values.iter().map(|(k, v)| format!("{} = {:.4}", k, v)).collect();
            info!("Epoch {} [{}] {}", ctx.epoch + 1, tag, summary.join(", "));
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::semi::tests::sample_dataset;
    use crate::model::{ConcatIoModelConfig, GraphVaeConfig, ModelConfig};
    use crate::nasbench::graph::tests::sample_graph;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn models() -> (GraphVae<TestBackend>, ConcatIoModel<TestBackend>) {
        let device = Default::default();
        let vae = GraphVaeConfig::new(5)
            .with_hidden_dim(4)
            .with_latent_dim(2)
            .with_num_layers(1)
            .init(&device);
        let labeled = ConcatIoModelConfig::new(1, 1, [1, 1])
            .with_hidden_channels(2)
            .with_n_steps(1)
            .with_n_convs(1)
            .init(vae.clone(), &device);
        (vae, labeled)
    }

    #[test]
    fn test_validation_metrics_per_variant() {
        let (vae, labeled) = models();
        let data = sample_dataset(0, 4, 1);
        let graphs = vec![sample_graph().encode().unwrap(); 3];
        let mut evaluator = ValidationEvaluator::<TestBackend>::new(
            &graphs,
            Some(&data),
            2,
            BatchEvaluator::from_config(&ModelConfig::default()).unwrap(),
            &Default::default(),
        )
        .unwrap();

        let statistics = EpochStatistics::default();
        let metrics = evaluator
            .evaluate(&EvalContext {
                epoch: 0,
                primary: &vae,
                labeled: &labeled,
                reference: Some(&vae),
                statistics: &statistics,
            })
            .unwrap();

        for tag in [VariantTag::Primary, VariantTag::Labeled, VariantTag::Reference] {
            assert!(metrics.get(tag, "val_loss").unwrap().is_finite());
            let ops = metrics.get(tag, "ops_acc").unwrap();
            assert!((0.0..=1.0).contains(&ops));
        }
        assert!(metrics.get(VariantTag::Labeled, "val_io_loss").is_some());
        assert!(metrics.get(VariantTag::Primary, "val_io_loss").is_none());
    }

    #[test]
    fn test_training_statistics_only() {
        let (vae, labeled) = models();
        let mut statistics = EpochStatistics::new(&[VariantTag::Primary]);
        statistics
            .variant_mut(VariantTag::Primary)
            .0
            .record(LossCategory::Total, 2.0);

        let metrics = TrainingStatistics
            .evaluate(&EvalContext {
                epoch: 0,
                primary: &vae,
                labeled: &labeled,
                reference: None,
                statistics: &statistics,
            })
            .unwrap();
        assert_eq!(metrics.get(VariantTag::Primary, "train_loss"), Some(2.0));
        assert_eq!(metrics.get(VariantTag::Primary, "z_mean"), None);
    }
}
