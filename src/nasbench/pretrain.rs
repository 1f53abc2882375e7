//! Supervised pretraining of candidate networks.
//!
//! Produces the pretrained-network directory consumed by the IO dataset
//! builder.

use std::path::Path;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::{debug, info};

use super::lookup::ArchitectureLookup;
use super::network::{CandidateNetwork, CellNetwork, CellNetworkConfig};
use super::storage::{save_trained_net, NetInfo};
use crate::dataset::{extract::get_net_outputs, ValidationSet};
use crate::model::config::IoConfig;
use crate::utils::error::Result;

/// Settings of one pretraining run
#[derive(Debug, Clone)]
pub struct PretrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for PretrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
        }
    }
}

/// Train `net` with Adam and cross-entropy; returns the trained network and
/// the last epoch's mean loss and accuracy.
pub fn pretrain_network<B: AutodiffBackend>(
    mut net: CellNetwork<B>,
    train: &ValidationSet,
    options: &PretrainOptions,
    device: &B::Device,
) -> Result<(CellNetwork<B>, f64, f64)> {
    let batches = train.batches::<B>(options.batch_size, device)?;
    let mut optimizer = AdamConfig::new().init::<B, CellNetwork<B>>();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut epoch_loss = f64::INFINITY;
    let mut epoch_acc = 0.0;
    for epoch in 0..options.epochs {
        let mut total_loss = 0.0;
        let mut correct = 0usize;
        let mut total = 0usize;

        for batch in &batches {
            let output = net.forward(batch.images.clone());
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            total_loss += loss_value;

            let predictions = output.argmax(1).squeeze::<1>(1);
            let batch_correct: i64 = predictions
                .equal(batch.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;
            total += batch.len();

            let grads = GradientsParams::from_grads(loss.backward(), &net);
            net = optimizer.step(options.learning_rate, net, grads);
        }

        if !batches.is_empty() {
            epoch_loss = total_loss / batches.len() as f64;
            epoch_acc = correct as f64 / total.max(1) as f64;
        }
        debug!(
            "  pretrain epoch {}/{}: loss = {:.4}, acc = {:.2}%",
            epoch + 1,
            options.epochs,
            epoch_loss,
            100.0 * epoch_acc
        );
    }

    Ok((net, epoch_loss, epoch_acc))
}

/// Build, train, validate and store the network of `hash`
pub fn pretrain_and_save<B: AutodiffBackend>(
    dir: &Path,
    hash: &str,
    lookup: &dyn ArchitectureLookup,
    config: &CellNetworkConfig,
    train: &ValidationSet,
    valid: &ValidationSet,
    options: &PretrainOptions,
    device: &B::Device,
) -> Result<NetInfo> {
    let graph = lookup.graph(hash)?;
    let net: CellNetwork<B> = config.init(&graph, device)?;

    info!("Pretraining network {} for {} epochs", hash, options.epochs);
    let (net, train_loss, train_acc) = pretrain_network(net, train, options, device)?;

    let eval_net = net.valid();
    let valid_batches = valid.batches::<B::InnerBackend>(options.batch_size, device)?;
    let outputs = get_net_outputs(&eval_net, &valid_batches, &IoConfig::new(0, -1), None, None)?;

    let mut info = NetInfo::new();
    info.insert("train_loss".to_string(), train_loss);
    info.insert("train_accuracy".to_string(), train_acc);
    info.insert("val_loss".to_string(), outputs.mean_loss);
    info.insert("val_accuracy".to_string(), outputs.accuracy);

    save_trained_net(dir, hash, &net.valid(), config, info.clone())?;
    info!(
        "Network {}: val_loss = {:.4}, val_acc = {:.2}%",
        hash,
        outputs.mean_loss,
        100.0 * outputs.accuracy
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::HostTensor;
    use crate::nasbench::graph::tests::sample_graph;
    use crate::nasbench::lookup::NasBenchIndex;
    use crate::nasbench::storage::is_net_pretrained;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_set() -> ValidationSet {
        let values: Vec<f32> = (0..6 * 3 * 4 * 4).map(|v| (v % 7) as f32 / 7.0).collect();
        let images = HostTensor::new(vec![6, 3, 4, 4], values).unwrap();
        ValidationSet::new(images, vec![0, 1, 0, 1, 0, 1]).unwrap()
    }

    #[test]
    fn test_pretrain_and_save() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut index = NasBenchIndex::new();
        index.insert("h1", sample_graph());

        let config = CellNetworkConfig::new()
            .with_stem_channels(4)
            .with_num_stacks(1)
            .with_cells_per_stack(1)
            .with_num_labels(2);
        let options = PretrainOptions {
            epochs: 2,
            batch_size: 3,
            learning_rate: 1e-3,
        };

        let set = tiny_set();
        let info = pretrain_and_save::<TestBackend>(
            dir.path(),
            "h1",
            &index,
            &config,
            &set,
            &set,
            &options,
            &device,
        )
        .unwrap();

        assert!(is_net_pretrained(dir.path(), "h1"));
        assert!(info["train_loss"].is_finite());
        let acc = info["val_accuracy"];
        assert!((0.0..=1.0).contains(&acc));
    }
}
