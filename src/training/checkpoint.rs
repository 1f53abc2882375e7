//! Per-variant training checkpoints.
//!
//! One JSON document per (variant, epoch), named
//! `model_{orig|labeled|ref}_epoch-{epoch}.ckpt`. Each document carries the
//! model and optimizer records as bytes plus enough constructor information to
//! rebuild the model, so every variant restores independently.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    optim::Optimizer,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::ModelConfig;
use crate::utils::error::{InfoNasError, Result};
use crate::utils::metrics::VariantTag;

const EXTENSION: &str = "ckpt";

fn recorder() -> BinBytesRecorder<FullPrecisionSettings> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
}

/// Serialize the weights of `model`
pub fn model_to_bytes<B: Backend, M: Module<B>>(model: &M) -> Result<Vec<u8>> {
    Ok(Recorder::<B>::record(&recorder(), model.clone().into_record(), ())?)
}

/// Load weights produced by [`model_to_bytes`] into `model`
pub fn model_from_bytes<B: Backend, M: Module<B>>(model: M, bytes: Vec<u8>, device: &B::Device) -> Result<M> {
    let record: M::Record = Recorder::<B>::load(&recorder(), bytes, device)?;
    Ok(model.load_record(record))
}

pub fn optimizer_to_bytes<B, M, O>(optimizer: &O) -> Result<Vec<u8>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    Ok(Recorder::<B>::record(&recorder(), optimizer.to_record(), ())?)
}

pub fn optimizer_from_bytes<B, M, O>(optimizer: O, bytes: Vec<u8>, device: &B::Device) -> Result<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let record: O::Record = Recorder::<B>::load(&recorder(), bytes, device)?;
    Ok(optimizer.load_record(record))
}

/// A restorable snapshot of one model variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantCheckpoint {
    pub tag: VariantTag,
    pub epoch: usize,
    /// Architecture name of the stored model
    pub model_class: String,
    /// Constructor configuration of the stored model
    pub model_kwargs: serde_json::Value,
    /// Run configuration, stored with the label-extended model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ModelConfig>,
    pub model_state: Vec<u8>,
    pub optimizer_state: Vec<u8>,
    pub timestamp: String,
}

impl VariantCheckpoint {
    /// Load the stored weights into a freshly built `model`
    pub fn restore_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        model_from_bytes(model, self.model_state.clone(), device)
    }

    pub fn restore_optimizer<B, M, O>(&self, optimizer: O, device: &B::Device) -> Result<O>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        optimizer_from_bytes::<B, M, O>(optimizer, self.optimizer_state.clone(), device)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(InfoNasError::PathNotFound(path.to_path_buf()));
        }
        let checkpoint = serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| InfoNasError::Checkpoint(format!("invalid checkpoint {:?}: {}", path, e)))?;
        Ok(checkpoint)
    }
}

/// File name of the checkpoint of `tag` at `epoch`
pub fn checkpoint_file_name(tag: VariantTag, epoch: usize) -> String {
    format!("model_{}_epoch-{}.{}", tag.file_stem(), epoch, EXTENSION)
}

/// Variant and epoch encoded in a checkpoint file name
pub fn parse_checkpoint_file_name(name: &str) -> Option<(VariantTag, usize)> {
    let stem = name.strip_prefix("model_")?.strip_suffix(".ckpt")?;
    let (variant, epoch) = stem.split_once("_epoch-")?;
    let tag = [VariantTag::Primary, VariantTag::Labeled, VariantTag::Reference]
        .into_iter()
        .find(|t| t.file_stem() == variant)?;
    Some((tag, epoch.parse().ok()?))
}

/// Writes and enumerates checkpoints in one directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: PathBuf) -> Self {
        Self { checkpoint_dir }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn path_for(&self, tag: VariantTag, epoch: usize) -> PathBuf {
        self.checkpoint_dir.join(checkpoint_file_name(tag, epoch))
    }

    pub fn save(&self, checkpoint: &VariantCheckpoint) -> Result<PathBuf> {
        let path = self.path_for(checkpoint.tag, checkpoint.epoch);
        checkpoint.save(&path)?;
        info!("Saved {} checkpoint for epoch {} to {:?}", checkpoint.tag, checkpoint.epoch, path);
        Ok(path)
    }

    pub fn load(&self, tag: VariantTag, epoch: usize) -> Result<VariantCheckpoint> {
        let checkpoint = VariantCheckpoint::load(&self.path_for(tag, epoch))?;
        if checkpoint.tag != tag || checkpoint.epoch != epoch {
            return Err(InfoNasError::Checkpoint(format!(
                "checkpoint file for {} epoch {} holds {} epoch {}",
                tag, epoch, checkpoint.tag, checkpoint.epoch
            )));
        }
        Ok(checkpoint)
    }

    /// Checkpoints of `tag`, oldest epoch first
    pub fn list_checkpoints(&self, tag: VariantTag) -> Result<Vec<(usize, PathBuf)>> {
        if !self.checkpoint_dir.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((t, epoch)) = parse_checkpoint_file_name(name) {
                if t == tag {
                    found.push((epoch, path));
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Most recent checkpoint of `tag`, if any
    pub fn latest(&self, tag: VariantTag) -> Result<Option<VariantCheckpoint>> {
        match self.list_checkpoints(tag)?.pop() {
            Some((_, path)) => Ok(Some(VariantCheckpoint::load(&path)?)),
            None => Ok(None),
        }
    }
}
