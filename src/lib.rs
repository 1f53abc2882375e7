//! # info_nas
//!
//! Semi-supervised embeddings of neural architectures, built with Burn.
//!
//! A graph autoencoder learns to reconstruct NAS-Bench style cell graphs.
//! A label-extended model wrapping the same autoencoder additionally learns
//! to predict intermediate activations of pretrained candidate networks from
//! their inputs and the architecture embedding.
//!
//! ## Modules
//!
//! - `nasbench`: architecture graphs, the benchmark index, trainable candidate
//!   networks and their storage
//! - `dataset`: IO extraction from pretrained networks and the mixed
//!   labeled/unlabeled training data
//! - `model`: the autoencoder, the label-extended model, losses,
//!   preprocessing and configuration
//! - `training`: batch routing, per-batch evaluation, checkpoints and the
//!   multi-variant training loop
//! - `utils`: errors, logging and metric bookkeeping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use info_nas::backend::{default_device, TrainingBackend};
//! use info_nas::model::{ConfigSource, TrainOptions};
//! use info_nas::training::{train, TrainingStatistics};
//!
//! let device = default_device();
//! let shapes = data.io_shapes()?;
//! let outcome = train::<TrainingBackend>(
//!     &ConfigSource::Default,
//!     TrainOptions::default(),
//!     shapes,
//!     &data,
//!     &mut TrainingStatistics,
//!     &device,
//! )?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod nasbench;
pub mod training;
pub mod utils;

pub use dataset::{IoDataset, SemiSupervisedDataset, ValidationSet};
pub use model::{ConcatIoModel, GraphVae, ModelConfig, TrainOptions};
pub use nasbench::{ArchitectureLookup, NasBenchIndex, NetworkGraph};
pub use training::{train, SemiSupervisedTrainer, TrainOutcome};
pub use utils::error::{InfoNasError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
