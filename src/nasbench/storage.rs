//! Persistence of pretrained candidate networks.
//!
//! Each network is stored as two files in a flat directory:
//! `{hash}.mpk` with the weights (CompactRecorder) and `{hash}.json` with the
//! hash, the constructor configuration and free-form training info.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::lookup::ArchitectureLookup;
use super::network::{CellNetwork, CellNetworkConfig};
use crate::utils::error::{InfoNasError, Result};

/// Free-form training diagnostics stored next to the weights
pub type NetInfo = BTreeMap<String, f64>;

/// Metadata document of a pretrained network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedNetMetadata {
    pub hash: String,
    pub config: CellNetworkConfig,
    pub info: NetInfo,
    pub timestamp: String,
}

/// A pretrained network restored from disk
#[derive(Debug)]
pub struct LoadedNetwork<B: Backend> {
    pub hash: String,
    pub net: CellNetwork<B>,
    pub info: NetInfo,
}

fn metadata_path(dir: &Path, hash: &str) -> PathBuf {
    dir.join(format!("{}.json", hash))
}

fn weights_stem(dir: &Path, hash: &str) -> PathBuf {
    dir.join(hash)
}

/// True when both files of `hash` exist in `dir`
pub fn is_net_pretrained(dir: &Path, hash: &str) -> bool {
    metadata_path(dir, hash).exists() && weights_stem(dir, hash).with_extension("mpk").exists()
}

pub fn save_trained_net<B: Backend>(
    dir: &Path,
    hash: &str,
    net: &CellNetwork<B>,
    config: &CellNetworkConfig,
    info: NetInfo,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    net.clone()
        .save_file(weights_stem(dir, hash), &CompactRecorder::new())?;

    let metadata = TrainedNetMetadata {
        hash: hash.to_string(),
        config: config.clone(),
        info,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    fs::write(
        metadata_path(dir, hash),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    debug!("Saved pretrained network {} to {:?}", hash, dir);
    Ok(())
}

/// Rebuild the network of `hash` from its graph and stored weights
pub fn load_trained_net<B: Backend>(
    dir: &Path,
    hash: &str,
    lookup: &dyn ArchitectureLookup,
    device: &B::Device,
) -> Result<LoadedNetwork<B>> {
    let path = metadata_path(dir, hash);
    if !path.exists() {
        return Err(InfoNasError::PathNotFound(path));
    }
    let metadata: TrainedNetMetadata = serde_json::from_str(&fs::read_to_string(&path)?)?;
    if metadata.hash != hash {
        return Err(InfoNasError::Dataset(format!(
            "metadata at {:?} belongs to network '{}'",
            path, metadata.hash
        )));
    }

    let graph = lookup.graph(hash)?;
    let net = metadata
        .config
        .init::<B>(&graph, device)?
        .load_file(weights_stem(dir, hash), &CompactRecorder::new(), device)?;

    Ok(LoadedNetwork {
        hash: metadata.hash,
        net,
        info: metadata.info,
    })
}

/// Hashes of every pretrained network in `dir`, sorted
pub fn list_pretrained(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Err(InfoNasError::PathNotFound(dir.to_path_buf()));
    }
    let mut hashes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(hash) = path.file_stem().and_then(|s| s.to_str()) {
            if is_net_pretrained(dir, hash) {
                hashes.push(hash.to_string());
            }
        }
    }
    hashes.sort();
    info!("Found {} pretrained networks in {:?}", hashes.len(), dir);
    Ok(hashes)
}
