//! Configuration
//!
//! Model configuration is a nested key/value document (JSON or TOML). Every
//! top-level key is required except `checkpoint`; registry selectors
//! (`model_class`, `loss`, `arch2vec_config`) are resolved against closed
//! registries so unknown keys fail at load time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::preprocessing::PrepMethod;
use super::vae::GraphVaeConfig;
use crate::nasbench::NUM_OPERATIONS;
use crate::utils::error::{InfoNasError, Result};

/// Label-extended model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelClass {
    #[serde(rename = "concat")]
    Concat,
}

impl ModelClass {
    pub fn from_key(key: &str) -> Result<Self> {
        match key {
            "concat" => Ok(ModelClass::Concat),
            other => Err(InfoNasError::ConfigurationKey(format!(
                "unknown model_class '{}'",
                other
            ))),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ModelClass::Concat => "concat",
        }
    }
}

/// Loss applied to the reconstructed IO activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoLossKind {
    #[serde(rename = "MSE")]
    Mse,
    #[serde(rename = "L1")]
    L1,
}

impl IoLossKind {
    pub fn from_key(key: &str) -> Result<Self> {
        match key {
            "MSE" => Ok(IoLossKind::Mse),
            "L1" => Ok(IoLossKind::L1),
            other => Err(InfoNasError::ConfigurationKey(format!("unknown loss '{}'", other))),
        }
    }
}

/// Constructor arguments of the label-extended model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelKwargs {
    pub n_steps: usize,
    pub n_convs: usize,
    pub use_3x3_for_z: bool,
    pub use_3x3_for_output: bool,
    pub hidden_channels: usize,
}

impl Default for ModelKwargs {
    fn default() -> Self {
        Self {
            n_steps: 2,
            n_convs: 2,
            use_3x3_for_z: false,
            use_3x3_for_output: false,
            hidden_channels: 32,
        }
    }
}

/// Composition of the mixed labeled/unlabeled batch stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Unlabeled batches emitted before each labeled batch
    pub k: usize,
}

/// Optimizer of the label-extended model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub lr: f64,
    #[serde(default)]
    pub weight_decay: Option<f64>,
}

/// Top-level model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_class: ModelClass,
    pub model_kwargs: ModelKwargs,
    pub loss: IoLossKind,
    /// Checkpoint interval in epochs; absent means final-epoch checkpoint only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<usize>,
    pub dataset_config: DatasetConfig,
    pub arch2vec_config: usize,
    pub optimizer: OptimizerConfig,
}

const REQUIRED_KEYS: [&str; 6] = [
    "model_class",
    "model_kwargs",
    "loss",
    "dataset_config",
    "arch2vec_config",
    "optimizer",
];

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_class: ModelClass::Concat,
            model_kwargs: ModelKwargs::default(),
            loss: IoLossKind::Mse,
            checkpoint: Some(5),
            dataset_config: DatasetConfig { k: crate::dataset::DEFAULT_K },
            arch2vec_config: 4,
            optimizer: OptimizerConfig {
                lr: 1e-3,
                weight_decay: None,
            },
        }
    }
}

impl ModelConfig {
    /// Parse from a generic document, reporting the first missing or unknown key
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| InfoNasError::Config("model config must be a key/value mapping".to_string()))?;

        for key in REQUIRED_KEYS {
            if !object.contains_key(key) {
                return Err(InfoNasError::ConfigurationKey(format!("missing key '{}'", key)));
            }
        }
        if let Some(class) = object["model_class"].as_str() {
            ModelClass::from_key(class)?;
        }
        if let Some(loss) = object["loss"].as_str() {
            IoLossKind::from_key(loss)?;
        }

        let config: ModelConfig = serde_json::from_value(value)
            .map_err(|e| InfoNasError::Config(format!("invalid model config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(InfoNasError::PathNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let value = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            let parsed: toml::Value = toml::from_str(&text)
                .map_err(|e| InfoNasError::Serialization(format!("invalid TOML: {}", e)))?;
            serde_json::to_value(parsed)?
        } else {
            serde_json::from_str(&text)?
        };
        info!("Loaded model config from {:?}", path);
        Self::from_value(value)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint == Some(0) {
            return Err(InfoNasError::Config("checkpoint interval must be positive".to_string()));
        }
        if self.dataset_config.k == 0 {
            return Err(InfoNasError::Config("dataset_config.k must be positive".to_string()));
        }
        if self.model_kwargs.n_steps == 0 || self.model_kwargs.hidden_channels == 0 {
            return Err(InfoNasError::Config(
                "model_kwargs.n_steps and hidden_channels must be positive".to_string(),
            ));
        }
        if self.optimizer.lr <= 0.0 {
            return Err(InfoNasError::Config("optimizer.lr must be positive".to_string()));
        }
        ArchHyperparams::lookup(self.arch2vec_config)?;
        Ok(())
    }

    /// Whether `epoch` (0-based) of a run of `epochs` epochs is checkpointed
    pub fn should_checkpoint(&self, epoch: usize, epochs: usize) -> bool {
        if epoch + 1 == epochs {
            return true;
        }
        match self.checkpoint {
            Some(interval) => (epoch + 1) % interval == 0,
            None => false,
        }
    }
}

/// Where the orchestrator takes its model configuration from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    InMemory(ModelConfig),
    Path(PathBuf),
    Default,
}

impl ConfigSource {
    pub fn resolve(&self) -> Result<ModelConfig> {
        match self {
            ConfigSource::InMemory(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            ConfigSource::Path(path) => ModelConfig::load(path),
            ConfigSource::Default => Ok(ModelConfig::default()),
        }
    }
}

/// Weights of the graph reconstruction loss
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconLossWeights {
    pub w_ops: f64,
    pub w_adj: f64,
}

/// Optimizer settings of the graph autoencoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VaeOptimizerSettings {
    pub lr: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

/// One entry of the autoencoder hyperparameter registry
#[derive(Debug, Clone)]
pub struct ArchHyperparams {
    pub vae: GraphVaeConfig,
    pub prep: PrepMethod,
    pub loss: ReconLossWeights,
    pub optimizer: VaeOptimizerSettings,
}

impl ArchHyperparams {
    /// Number of registry entries
    pub const COUNT: usize = 5;

    /// Registry lookup by integer key
    pub fn lookup(key: usize) -> Result<Self> {
        let (prep, hidden, latent, layers) = match key {
            0 => (PrepMethod::Identity, 128, 16, 5),
            1 => (PrepMethod::Bidirectional { lbd: 1.0 }, 128, 16, 5),
            2 => (PrepMethod::Bidirectional { lbd: 0.5 }, 128, 16, 5),
            3 => (PrepMethod::Undirected, 64, 8, 3),
            4 => (PrepMethod::Undirected, 128, 16, 5),
            other => {
                return Err(InfoNasError::ConfigurationKey(format!(
                    "arch2vec_config {} not in registry (0..{})",
                    other,
                    Self::COUNT
                )))
            }
        };

        Ok(Self {
            vae: GraphVaeConfig::new(NUM_OPERATIONS)
                .with_hidden_dim(hidden)
                .with_latent_dim(latent)
                .with_num_layers(layers),
            prep,
            loss: ReconLossWeights {
                w_ops: 1.0,
                w_adj: 1.0,
            },
            optimizer: VaeOptimizerSettings {
                lr: 1e-3,
                beta_1: 0.9,
                beta_2: 0.999,
                epsilon: 1e-8,
            },
        })
    }
}

/// Layers whose input and output are recorded by the extractor.
///
/// Both indices are mandatory; negative values count from the end of the
/// network's layer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoConfig {
    pub nth_input: isize,
    pub nth_output: isize,
}

impl IoConfig {
    pub fn new(nth_input: isize, nth_output: isize) -> Self {
        Self {
            nth_input,
            nth_output,
        }
    }

    /// Raw images are stored by example index instead of by value
    pub fn uses_reference_inputs(&self) -> bool {
        self.nth_input == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStreamConfig {
    pub batch_size: usize,
    pub validation_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlabeledSplitConfig {
    pub test_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PretrainConfig {
    pub num_epochs: usize,
}

/// Process-wide data defaults for extraction and pretraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDatasetConfig {
    pub validation: ValidationStreamConfig,
    pub nb_dataset: UnlabeledSplitConfig,
    pub pretrain: PretrainConfig,
    pub io: IoConfig,
}

impl Default for LocalDatasetConfig {
    fn default() -> Self {
        Self {
            validation: ValidationStreamConfig {
                batch_size: 32,
                validation_size: 1000,
            },
            nb_dataset: UnlabeledSplitConfig { test_size: 0.1 },
            pretrain: PretrainConfig { num_epochs: 10 },
            io: IoConfig::new(0, -3),
        }
    }
}

impl LocalDatasetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(InfoNasError::PathNotFound(path.to_path_buf()));
        }
        serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| InfoNasError::Config(format!("invalid dataset config: {}", e)))
    }
}

/// Run-level training options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub batch_size: usize,
    pub seed: u64,
    pub epochs: usize,
    pub verbose: u8,
    pub print_frequency: usize,
    /// Number of tensors in a labeled batch
    pub batch_len_labeled: usize,
    pub use_reference_model: bool,
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::training::DEFAULT_BATCH_SIZE,
            seed: 1,
            epochs: crate::training::DEFAULT_EPOCHS,
            verbose: 2,
            print_frequency: 1000,
            batch_len_labeled: 4,
            use_reference_model: false,
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(InfoNasError::Config("batch_size must be positive".to_string()));
        }
        if self.batch_len_labeled < 4 {
            return Err(InfoNasError::Config(format!(
                "batch_len_labeled must be at least 4, got {}",
                self.batch_len_labeled
            )));
        }
        if self.print_frequency == 0 {
            return Err(InfoNasError::Config("print_frequency must be positive".to_string()));
        }
        Ok(())
    }
}
