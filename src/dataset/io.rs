//! IO dataset construction
//!
//! Fans the extractor out over a list of pretrained networks, tags every
//! record with the hash of the network it came from and shuffles all
//! parallel sequences with one permutation.

use std::fs;
use std::path::Path;

use burn::tensor::backend::Backend;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::extract::{get_net_outputs, SelectedInputs};
use super::host::HostTensor;
use super::validation::ValidationSet;
use crate::model::config::IoConfig;
use crate::nasbench::{list_pretrained, load_trained_net, ArchitectureLookup, CandidateNetwork};
use crate::utils::error::{InfoNasError, Result};

/// Labeled records of (network, selected input, selected output)
///
/// `net_hashes`, `inputs` and `outputs` are aligned index by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoDataset {
    pub net_hashes: Vec<String>,
    pub inputs: SelectedInputs,
    pub outputs: HostTensor,
    /// Raw validation images and targets, in stream order
    pub validation: ValidationSet,
    /// `inputs` are indices into `validation` rather than activations
    pub use_reference: bool,
    /// Number of networks that contributed records
    pub n_nets: usize,
}

impl IoDataset {
    pub fn len(&self) -> usize {
        self.net_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net_hashes.is_empty()
    }

    /// Check that the three record sequences have equal length
    pub fn validate(&self) -> Result<()> {
        check_len("selected inputs vs network hashes", self.len(), self.inputs.len())?;
        check_len("selected outputs vs network hashes", self.len(), self.outputs.rows())?;
        if self.use_reference != self.inputs.is_reference() {
            return Err(InfoNasError::Dataset(
                "reference flag disagrees with stored inputs".to_string(),
            ));
        }
        Ok(())
    }

    /// Records at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let net_hashes = indices
            .iter()
            .map(|&i| {
                self.net_hashes
                    .get(i)
                    .cloned()
                    .ok_or(InfoNasError::IndexOutOfRange {
                        kind: "record",
                        index: i as isize,
                        len: self.len(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut contributing = net_hashes.clone();
        contributing.sort();
        contributing.dedup();

        Ok(Self {
            net_hashes,
            inputs: self.inputs.permute(indices)?,
            outputs: self.outputs.select_rows(indices)?,
            validation: self.validation.clone(),
            use_reference: self.use_reference,
            n_nets: contributing.len(),
        })
    }

    /// Split off a held-out fraction of the records
    pub fn split(&self, test_size: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_size) {
            return Err(InfoNasError::Config(format!(
                "test_size must be in [0, 1), got {}",
                test_size
            )));
        }
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        let n_test = (self.len() as f64 * test_size).round() as usize;
        let (test, train) = indices.split_at(n_test);
        Ok((self.select(train)?, self.select(test)?))
    }

    /// Input rows resolvable per record; reference indices are checked
    /// against the validation images here, once
    pub fn input_rows(&self) -> Result<InputRows> {
        match &self.inputs {
            SelectedInputs::Activations(t) => Ok(InputRows::Activations(t.clone())),
            SelectedInputs::Reference(indices) => {
                let n_images = self.validation.len();
                let rows = indices
                    .iter()
                    .map(|&i| match usize::try_from(i) {
                        Ok(row) if row < n_images => Ok(row),
                        _ => Err(InfoNasError::IndexOutOfRange {
                            kind: "reference",
                            index: i as isize,
                            len: n_images,
                        }),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(InputRows::Reference {
                    rows,
                    images: self.validation.images.clone(),
                })
            }
        }
    }
}

/// Model inputs of every record
///
/// Reference records keep one copy of the validation images and resolve
/// their rows only when a batch is built.
#[derive(Debug, Clone, PartialEq)]
pub enum InputRows {
    Activations(HostTensor),
    Reference { rows: Vec<usize>, images: HostTensor },
}

impl InputRows {
    pub fn len(&self) -> usize {
        match self {
            InputRows::Activations(t) => t.rows(),
            InputRows::Reference { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of the backing storage; every dimension but the first is the
    /// shape of one record
    pub fn storage_shape(&self) -> &[usize] {
        match self {
            InputRows::Activations(t) => &t.shape,
            InputRows::Reference { images, .. } => &images.shape,
        }
    }

    /// Inputs of `records`, in that order
    pub fn select(&self, records: &[usize]) -> Result<HostTensor> {
        match self {
            InputRows::Activations(t) => t.select_rows(records),
            InputRows::Reference { rows, images } => {
                let image_rows = records
                    .iter()
                    .map(|&r| {
                        rows.get(r).copied().ok_or(InfoNasError::IndexOutOfRange {
                            kind: "record",
                            index: r as isize,
                            len: rows.len(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                images.select_rows(&image_rows)
            }
        }
    }
}

fn check_len(context: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(InfoNasError::ShapeMismatch {
            context: context.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Build the shuffled IO dataset from `nets`.
///
/// Every network is run over the same validation stream. With `random_state`
/// the permutation is reproducible; `None` draws it from thread entropy.
pub fn create_io_dataset<B: Backend, N: CandidateNetwork<B>>(
    nets: &[(String, N)],
    validation: &ValidationSet,
    batch_size: usize,
    io: &IoConfig,
    random_state: Option<u64>,
    device: &B::Device,
) -> Result<IoDataset> {
    if nets.is_empty() {
        return Err(InfoNasError::InvalidInput(
            "at least one pretrained network is required".to_string(),
        ));
    }
    let batches = validation.batches::<B>(batch_size, device)?;

    let mut net_hashes = Vec::new();
    let mut inputs = Vec::with_capacity(nets.len());
    let mut outputs = Vec::with_capacity(nets.len());

    for (hash, net) in nets {
        let extracted = get_net_outputs(net, &batches, io, None, Some(validation.len()))?;
        check_len(
            &format!("extracted inputs vs outputs of {}", hash),
            extracted.inputs.len(),
            extracted.outputs.rows(),
        )?;
        debug!(
            "Net {}: {} records, loss = {:.4}, acc = {:.2}%",
            hash,
            extracted.outputs.rows(),
            extracted.mean_loss,
            100.0 * extracted.accuracy
        );

        net_hashes.extend(std::iter::repeat(hash.clone()).take(extracted.outputs.rows()));
        inputs.push(extracted.inputs);
        outputs.push(extracted.outputs);
    }

    let inputs = SelectedInputs::concat(inputs)?;
    let outputs = HostTensor::concat(&outputs)?;
    check_len("concatenated inputs vs network hashes", net_hashes.len(), inputs.len())?;
    check_len("concatenated outputs vs network hashes", net_hashes.len(), outputs.rows())?;

    let unshuffled = IoDataset {
        net_hashes,
        inputs,
        outputs,
        validation: validation.clone(),
        use_reference: io.uses_reference_inputs(),
        n_nets: nets.len(),
    };

    let mut permutation: Vec<usize> = (0..unshuffled.len()).collect();
    match random_state {
        Some(seed) => permutation.shuffle(&mut ChaCha8Rng::seed_from_u64(seed)),
        None => permutation.shuffle(&mut rand::thread_rng()),
    }
    let mut dataset = unshuffled.select(&permutation)?;
    // one entry per network passed in, even when two share a hash
    dataset.n_nets = nets.len();

    info!(
        "Built IO dataset: {} records from {} networks",
        dataset.len(),
        dataset.n_nets
    );
    Ok(dataset)
}

/// Load every pretrained network in `pretrained_dir`, build the dataset and
/// persist it to `out_path`
pub fn dataset_from_pretrained<B: Backend>(
    pretrained_dir: &Path,
    lookup: &dyn ArchitectureLookup,
    validation: &ValidationSet,
    batch_size: usize,
    io: &IoConfig,
    random_state: Option<u64>,
    out_path: &Path,
    device: &B::Device,
) -> Result<IoDataset> {
    let hashes = list_pretrained(pretrained_dir)?;
    let mut nets = Vec::with_capacity(hashes.len());
    for hash in &hashes {
        let loaded = load_trained_net::<B>(pretrained_dir, hash, lookup, device)?;
        nets.push((loaded.hash, loaded.net));
    }

    let dataset = create_io_dataset(&nets, validation, batch_size, io, random_state, device)?;
    save_io_dataset(&dataset, out_path)?;
    Ok(dataset)
}

pub fn save_io_dataset(dataset: &IoDataset, path: &Path) -> Result<()> {
    dataset.validate()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(dataset)?)?;
    info!("Saved IO dataset ({} records) to {:?}", dataset.len(), path);
    Ok(())
}

pub fn load_io_dataset(path: &Path) -> Result<IoDataset> {
    if !path.exists() {
        return Err(InfoNasError::PathNotFound(path.to_path_buf()));
    }
    let dataset: IoDataset = serde_json::from_str(&fs::read_to_string(path)?)?;
    dataset.validate()?;
    Ok(dataset)
}
