//! A model, its optimizer and its tag

use burn::{
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, decay::WeightDecayConfig, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};

use super::checkpoint::{model_to_bytes, optimizer_to_bytes, VariantCheckpoint};
use super::clip::{clip_grad_norm, MAX_GRAD_NORM};
use crate::model::config::{OptimizerConfig, VaeOptimizerSettings};
use crate::model::ModelConfig;
use crate::utils::error::{InfoNasError, Result};
use crate::utils::metrics::VariantTag;

pub type AdamOptimizer<B, M> = OptimizerAdaptor<Adam<<B as AutodiffBackend>::InnerBackend>, M, B>;

/// Adam hyperparameters of one variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamSettings {
    pub lr: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
    pub weight_decay: Option<f64>,
}

impl From<VaeOptimizerSettings> for AdamSettings {
    fn from(s: VaeOptimizerSettings) -> Self {
        Self {
            lr: s.lr,
            beta_1: s.beta_1,
            beta_2: s.beta_2,
            epsilon: s.epsilon,
            weight_decay: None,
        }
    }
}

impl From<&OptimizerConfig> for AdamSettings {
    fn from(c: &OptimizerConfig) -> Self {
        Self {
            lr: c.lr,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-5,
            weight_decay: c.weight_decay,
        }
    }
}

impl AdamSettings {
    fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> AdamOptimizer<B, M> {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
            .with_weight_decay(self.weight_decay.map(WeightDecayConfig::new))
            .init()
    }
}

/// One of the concurrently trained models with its own optimizer state
pub struct ModelVariant<B: AutodiffBackend, M: AutodiffModule<B>> {
    pub tag: VariantTag,
    pub model: M,
    optimizer: AdamOptimizer<B, M>,
    lr: f64,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> ModelVariant<B, M> {
    pub fn new(tag: VariantTag, model: M, settings: AdamSettings) -> Self {
        Self {
            tag,
            model,
            optimizer: settings.init(),
            lr: settings.lr,
        }
    }

    /// Backpropagate `loss`, clip the gradient norm and apply one optimizer
    /// step. Returns the gradient norm before clipping.
    pub fn step(&mut self, loss: Tensor<B, 1>) -> f64 {
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let (grads, norm) = clip_grad_norm(&self.model, grads, MAX_GRAD_NORM);
        self.model = self.optimizer.step(self.lr, self.model.clone(), grads);
        norm
    }

    /// Snapshot weights and optimizer state
    pub fn checkpoint(
        &self,
        epoch: usize,
        model_class: &str,
        model_kwargs: serde_json::Value,
        config: Option<&ModelConfig>,
    ) -> Result<VariantCheckpoint> {
        Ok(VariantCheckpoint {
            tag: self.tag,
            epoch,
            model_class: model_class.to_string(),
            model_kwargs,
            config: config.cloned(),
            model_state: model_to_bytes::<B, M>(&self.model)?,
            optimizer_state: optimizer_to_bytes::<B, M, _>(&self.optimizer)?,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Load weights and optimizer state from a checkpoint of the same variant
    pub fn restore(&mut self, checkpoint: &VariantCheckpoint, device: &B::Device) -> Result<()> {
        if checkpoint.tag != self.tag {
            return Err(InfoNasError::Checkpoint(format!(
                "cannot restore {} from a {} checkpoint",
                self.tag, checkpoint.tag
            )));
        }
        self.model = checkpoint.restore_model(self.model.clone(), device)?;
        let optimizer = std::mem::replace(&mut self.optimizer, AdamConfig::new().init());
        self.optimizer = checkpoint.restore_optimizer::<B, M, _>(optimizer, device)?;
        Ok(())
    }
}
