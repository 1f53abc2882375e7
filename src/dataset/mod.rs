//! Datasets for semi-supervised embedding training
//!
//! - `validation`: the fixed image set every candidate network is evaluated on
//! - `extract`: per-network forward passes capturing selected layer activations
//! - `io`: the aligned IO dataset over many networks, with splits and storage
//! - `semi`: graph encodings mixed with labeled IO records into training batches

pub mod extract;
pub mod host;
pub mod io;
pub mod semi;
pub mod validation;

pub use extract::{get_net_outputs, NetOutputs, SelectedInputs};
pub use host::HostTensor;
pub use io::{create_io_dataset, dataset_from_pretrained, load_io_dataset, save_io_dataset, InputRows, IoDataset};
pub use semi::{encode_graphs, split_unlabeled, IoShapes, PlannedBatch, SemiSupervisedDataset};
pub use validation::{ValidationBatch, ValidationSet};

/// Default number of unlabeled batches between labeled ones
pub const DEFAULT_K: usize = 1000;
