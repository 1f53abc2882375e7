//! Semi-supervised training of architecture embeddings
//!
//! Batches are routed by arity into unlabeled (graph only) and labeled
//! (graph plus selected activations). Unlabeled batches train the graph
//! autoencoder, labeled batches the label-extended model sharing its weights,
//! and an optional reference autoencoder sees every batch without labels.

pub mod batch;
pub mod checkpoint;
pub mod clip;
pub mod eval;
pub mod evaluator;
pub mod seed;
pub mod trainer;
pub mod variant;

pub use batch::{Batch, BatchRouter, BatchSource, GraphTensors, IoSupervision, RawBatch};
pub use checkpoint::{CheckpointManager, VariantCheckpoint};
pub use eval::{EpochEvaluator, EvalContext, TrainingStatistics, ValidationEvaluator};
pub use evaluator::BatchEvaluator;
pub use seed::RunSeed;
pub use trainer::{train, SemiSupervisedTrainer, TrainOutcome};
pub use variant::{AdamSettings, ModelVariant};

/// Default number of epochs
pub const DEFAULT_EPOCHS: usize = 8;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;
