//! Semi-supervised training loop
//!
//! Trains up to three variants on one mixed batch stream:
//! - primary: the graph autoencoder, fed unlabeled batches
//! - labeled: the label-extended model wrapping the same autoencoder, fed
//!   labeled batches
//! - reference: an independent copy of the initial autoencoder fed every batch
//!   without IO supervision
//!
//! Primary and labeled share their autoencoder weights. After each step the
//! updated autoencoder is copied into the other variant; each variant keeps
//! its own optimizer state.

use std::path::PathBuf;
use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::batch::{Batch, BatchRouter, BatchSource};
use super::checkpoint::CheckpointManager;
use super::eval::{EpochEvaluator, EvalContext};
use super::evaluator::BatchEvaluator;
use super::seed::RunSeed;
use super::variant::{AdamSettings, ModelVariant};
use crate::dataset::semi::IoShapes;
use crate::model::{
    ArchHyperparams, ConcatIoModel, ConcatIoModelConfig, ConfigSource, GraphVae, GraphVaeConfig,
    ModelConfig, TrainOptions,
};
use crate::utils::error::Result;
use crate::utils::format_duration;
use crate::utils::metrics::{mean, EpochStatistics, LossCategory, RunLosses, RunMetrics, VariantTag};

/// Model class recorded in autoencoder checkpoints
const VAE_CLASS: &str = "vae";

/// Result of a full training run
pub struct TrainOutcome<B: AutodiffBackend> {
    /// The trained label-extended model
    pub model: ConcatIoModel<B>,
    pub metrics: RunMetrics,
    pub losses: RunLosses,
}

pub struct SemiSupervisedTrainer<B: AutodiffBackend> {
    config: ModelConfig,
    options: TrainOptions,
    vae_config: GraphVaeConfig,
    labeled_config: ConcatIoModelConfig,
    primary: ModelVariant<B, GraphVae<B>>,
    labeled: ModelVariant<B, ConcatIoModel<B>>,
    reference: Option<ModelVariant<B, GraphVae<B>>>,
    router: BatchRouter,
    evaluator: BatchEvaluator,
    checkpoints: CheckpointManager,
    rng: ChaCha8Rng,
}

impl<B: AutodiffBackend> SemiSupervisedTrainer<B> {
    /// Resolve the configuration, seed the run and build every variant.
    ///
    /// `shapes` describes the labeled activations the IO head must map.
    pub fn new(source: &ConfigSource, options: TrainOptions, shapes: IoShapes, device: &B::Device) -> Result<Self> {
        let config = source.resolve()?;
        options.validate()?;
        let arch = ArchHyperparams::lookup(config.arch2vec_config)?;
        let router = BatchRouter::new(options.batch_len_labeled)?;

        let rng = RunSeed::new(options.seed).init::<B>();

        let vae: GraphVae<B> = arch.vae.init(device);
        let labeled_config = ConcatIoModelConfig::from_kwargs(
            &config.model_kwargs,
            shapes.in_channels,
            shapes.out_channels,
            shapes.out_size,
        );
        let labeled = ModelVariant::new(
            VariantTag::Labeled,
            labeled_config.init(vae.clone(), device),
            AdamSettings::from(&config.optimizer),
        );
        let reference = options
            .use_reference_model
            .then(|| ModelVariant::new(VariantTag::Reference, vae.clone(), arch.optimizer.into()));
        let primary = ModelVariant::new(VariantTag::Primary, vae, arch.optimizer.into());

        let evaluator = BatchEvaluator::from_config(&config)?;
        let checkpoints = CheckpointManager::new(options.checkpoint_dir.clone());

        info!(
            "Trainer ready: arch2vec config {}, IO shapes {}->{} at {:?}, reference model: {}",
            config.arch2vec_config,
            shapes.in_channels,
            shapes.out_channels,
            shapes.out_size,
            options.use_reference_model
        );

        Ok(Self {
            config,
            options,
            vae_config: arch.vae,
            labeled_config,
            primary,
            labeled,
            reference,
            router,
            evaluator,
            checkpoints,
            rng,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Tags of the active variants in evaluation order
    pub fn variants(&self) -> Vec<VariantTag> {
        let mut tags = vec![VariantTag::Primary, VariantTag::Labeled];
        if self.reference.is_some() {
            tags.push(VariantTag::Reference);
        }
        tags
    }

    pub fn primary(&self) -> &GraphVae<B> {
        &self.primary.model
    }

    pub fn labeled(&self) -> &ConcatIoModel<B> {
        &self.labeled.model
    }

    pub fn reference(&self) -> Option<&GraphVae<B>> {
        self.reference.as_ref().map(|r| &r.model)
    }

    /// One pass over the batches `source` emits for this epoch.
    ///
    /// Every batch is routed before the first step, so a malformed batch
    /// fails the epoch with no weights changed.
    pub fn train_epoch(&mut self, epoch: usize, source: &dyn BatchSource<B>, device: &B::Device) -> Result<EpochStatistics> {
        let raw = source.epoch_batches(&mut self.rng, device)?;
        let batches = raw
            .into_iter()
            .map(|r| self.router.route(r))
            .collect::<Result<Vec<_>>>()?;

        let total = batches.len();
        let mut stats = EpochStatistics::new(&self.variants());
        for (i, batch) in batches.iter().enumerate() {
            self.train_batch(batch, &mut stats)?;

            if self.options.verbose >= 2 && (i + 1) % self.options.print_frequency == 0 {
                self.log_progress(epoch, i + 1, total, &stats);
            }
        }
        debug!("Epoch {} finished after {} batches", epoch + 1, total);
        Ok(stats)
    }

    fn train_batch(&mut self, batch: &Batch<B>, stats: &mut EpochStatistics) -> Result<()> {
        match batch {
            Batch::Unlabeled(graph) => {
                let (losses, embeddings) = stats.variant_mut(VariantTag::Primary);
                let loss = self
                    .evaluator
                    .eval_batch(&self.primary.model, graph, None, losses, embeddings)?;
                self.primary.step(loss);
                self.labeled.model.vae = self.primary.model.clone();
            }
            Batch::Labeled { graph, io } => {
                let (losses, embeddings) = stats.variant_mut(VariantTag::Labeled);
                let loss = self
                    .evaluator
                    .eval_batch(&self.labeled.model, graph, Some(io), losses, embeddings)?;
                self.labeled.step(loss);
                self.primary.model = self.labeled.model.vae.clone();
            }
        }

        if let Some(reference) = self.reference.as_mut() {
            let (losses, embeddings) = stats.variant_mut(VariantTag::Reference);
            let loss = self
                .evaluator
                .eval_batch(&reference.model, batch.graph(), None, losses, embeddings)?;
            reference.step(loss);
        }
        Ok(())
    }

    fn log_progress(&self, epoch: usize, batch: usize, total: usize, stats: &EpochStatistics) {
        let summary: Vec<String> = self
            .variants()
            .into_iter()
            .filter_map(|tag| {
                let losses = stats.losses(tag)?;
                let loss = mean(losses.values(LossCategory::Total))?;
                Some(format!("{} {:.4}", tag, loss))
            })
            .collect();
        info!(
            "Epoch {}/{} batch {}/{}: {}",
            epoch + 1,
            self.options.epochs,
            batch,
            total,
            summary.join(", ")
        );
    }

    /// Write one checkpoint per active variant
    pub fn checkpoint(&self, epoch: usize) -> Result<Vec<PathBuf>> {
        let vae_kwargs = serde_json::to_value(&self.vae_config)?;
        let labeled_kwargs = serde_json::to_value(&self.labeled_config)?;

        let mut paths = vec![
            self.checkpoints.save(&self.primary.checkpoint(epoch, VAE_CLASS, vae_kwargs.clone(), None)?)?,
            self.checkpoints.save(&self.labeled.checkpoint(
                epoch,
                self.config.model_class.key(),
                labeled_kwargs,
                Some(&self.config),
            )?)?,
        ];
        if let Some(reference) = &self.reference {
            paths.push(
                self.checkpoints
                    .save(&reference.checkpoint(epoch, VAE_CLASS, vae_kwargs, None)?)?,
            );
        }
        Ok(paths)
    }

    /// Train for the configured number of epochs, checkpointing and
    /// evaluating after each one.
    pub fn fit(
        mut self,
        source: &dyn BatchSource<B>,
        evaluator: &mut dyn EpochEvaluator<B>,
        device: &B::Device,
    ) -> Result<TrainOutcome<B>> {
        let epochs = self.options.epochs;
        let mut metrics = RunMetrics::default();
        let mut losses = RunLosses::default();

        info!("Training {} epochs, variants: {:?}", epochs, self.variants());
        let run_start = Instant::now();

        for epoch in 0..epochs {
            let start = Instant::now();
            let stats = self.train_epoch(epoch, source, device)?;

            if self.config.should_checkpoint(epoch, epochs) {
                self.checkpoint(epoch)?;
            }

            let epoch_metrics = evaluator.evaluate(&EvalContext {
                epoch,
                primary: &self.primary.model,
                labeled: &self.labeled.model,
                reference: self.reference.as_ref().map(|r| &r.model),
                statistics: &stats,
            })?;
            losses.merge_epoch(&stats);
            metrics.merge_epoch(epoch_metrics);

            if self.options.verbose >= 1 {
                info!(
                    "Epoch {}/{} done in {}",
                    epoch + 1,
                    epochs,
                    format_duration(start.elapsed().as_secs_f64())
                );
            }
        }

        info!("Training finished in {}", format_duration(run_start.elapsed().as_secs_f64()));
        Ok(TrainOutcome {
            model: self.labeled.model,
            metrics,
            losses,
        })
    }
}

/// Build a trainer for `shapes` and run it to completion
pub fn train<B: AutodiffBackend>(
    source: &ConfigSource,
    options: TrainOptions,
    shapes: IoShapes,
    data: &dyn BatchSource<B>,
    evaluator: &mut dyn EpochEvaluator<B>,
    device: &B::Device,
) -> Result<TrainOutcome<B>> {
    SemiSupervisedTrainer::new(source, options, shapes, device)?.fit(data, evaluator, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::semi::tests::sample_dataset;
    use crate::model::config::ModelKwargs;
    use crate::training::batch::RawBatch;
    use crate::training::checkpoint::model_to_bytes;
    use crate::training::eval::TrainingStatistics;
    use crate::utils::error::InfoNasError;
    use burn::backend::Autodiff;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    const SHAPES: IoShapes = IoShapes {
        in_channels: 1,
        out_channels: 1,
        out_size: [1, 1],
    };

    fn small_config(checkpoint: Option<usize>) -> ConfigSource {
        ConfigSource::InMemory(ModelConfig {
            model_kwargs: ModelKwargs {
                n_steps: 1,
                n_convs: 1,
                hidden_channels: 2,
                ..ModelKwargs::default()
            },
            checkpoint,
            arch2vec_config: 3,
            ..ModelConfig::default()
        })
    }

    fn options(dir: &TempDir, epochs: usize, use_reference_model: bool) -> TrainOptions {
        TrainOptions {
            batch_size: 4,
            epochs,
            verbose: 0,
            use_reference_model,
            checkpoint_dir: dir.path().to_path_buf(),
            ..TrainOptions::default()
        }
    }

    fn trainer(dir: &TempDir, epochs: usize, reference: bool, checkpoint: Option<usize>) -> SemiSupervisedTrainer<TestBackend> {
        SemiSupervisedTrainer::new(
            &small_config(checkpoint),
            options(dir, epochs, reference),
            SHAPES,
            &Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_bad_batch_arity_leaves_weights_untouched() {
        let dir = TempDir::new().unwrap();
        let mut trainer = trainer(&dir, 1, true, None);
        let device = Default::default();
        let primary = model_to_bytes(trainer.primary()).unwrap();
        let labeled = model_to_bytes(trainer.labeled()).unwrap();

        let source: Vec<RawBatch<TestBackend>> = vec![
            RawBatch::unlabeled(Tensor::zeros([2, 7, 7], &device), Tensor::zeros([2, 7, 5], &device)),
            RawBatch {
                adjacency: Tensor::zeros([2, 7, 7], &device),
                operations: Tensor::zeros([2, 7, 5], &device),
                extras: vec![Tensor::zeros([2, 1, 1, 1], &device)],
            },
        ];
        let result = trainer.train_epoch(0, &source, &device);

        assert!(matches!(result, Err(InfoNasError::BatchArity { arity: 3, .. })));
        assert_eq!(model_to_bytes(trainer.primary()).unwrap(), primary);
        assert_eq!(model_to_bytes(trainer.labeled()).unwrap(), labeled);
    }

    #[test]
    fn test_checkpoint_every_epoch() {
        let dir = TempDir::new().unwrap();
        let data = sample_dataset(4, 4, 1);
        let manager = CheckpointManager::new(dir.path().to_path_buf());

        trainer(&dir, 2, true, Some(1))
            .fit(&data, &mut TrainingStatistics, &Default::default())
            .unwrap();

        assert_eq!(manager.list_checkpoints(VariantTag::Labeled).unwrap().len(), 2);
        assert_eq!(manager.list_checkpoints(VariantTag::Reference).unwrap().len(), 2);
        assert_eq!(manager.list_checkpoints(VariantTag::Primary).unwrap().len(), 2);
    }

    #[test]
    fn test_checkpoint_final_epoch_only() {
        let dir = TempDir::new().unwrap();
        let data = sample_dataset(4, 4, 1);
        let manager = CheckpointManager::new(dir.path().to_path_buf());

        trainer(&dir, 2, true, Some(5))
            .fit(&data, &mut TrainingStatistics, &Default::default())
            .unwrap();

        let labeled = manager.list_checkpoints(VariantTag::Labeled).unwrap();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].0, 1);
        assert_eq!(manager.list_checkpoints(VariantTag::Reference).unwrap().len(), 1);

        let checkpoint = manager.load(VariantTag::Labeled, 1).unwrap();
        assert_eq!(checkpoint.model_class, "concat");
        assert!(checkpoint.config.is_some());
    }

    #[test]
    fn test_reference_never_sees_labels() {
        let dir = TempDir::new().unwrap();
        let data = sample_dataset(4, 4, 1);
        let outcome = trainer(&dir, 1, true, None)
            .fit(&data, &mut TrainingStatistics, &Default::default())
            .unwrap();

        let reference = outcome.losses.get(VariantTag::Reference).unwrap();
        assert!(reference.values(LossCategory::Labeled).is_empty());
        assert_eq!(reference.values(LossCategory::Total).len(), 1);

        let labeled = outcome.losses.get(VariantTag::Labeled).unwrap();
        assert_eq!(labeled.values(LossCategory::Labeled).len(), 1);
        assert!(outcome.metrics.series(VariantTag::Reference, "train_loss").is_some());
    }

    #[test]
    fn test_primary_and_labeled_share_the_autoencoder() {
        let dir = TempDir::new().unwrap();
        let data = sample_dataset(4, 4, 1);
        let mut trainer = trainer(&dir, 1, false, None);
        let before = model_to_bytes(trainer.primary()).unwrap();

        let stats = trainer.train_epoch(0, &data, &Default::default()).unwrap();

        let primary = model_to_bytes(trainer.primary()).unwrap();
        assert_ne!(primary, before);
        assert_eq!(model_to_bytes(&trainer.labeled().vae).unwrap(), primary);
        assert!(stats.losses(VariantTag::Reference).is_none());
        assert_eq!(trainer.variants(), vec![VariantTag::Primary, VariantTag::Labeled]);
    }

    #[test]
    fn test_missing_config_key_fails_at_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"model_class": "concat", "loss": "MSE"}"#).unwrap();

        let result = SemiSupervisedTrainer::<TestBackend>::new(
            &ConfigSource::Path(path),
            options(&dir, 1, false),
            SHAPES,
            &Default::default(),
        );
        assert!(matches!(result, Err(InfoNasError::ConfigurationKey(_))));
    }
}
