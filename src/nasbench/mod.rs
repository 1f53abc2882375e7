//! Candidate architectures: cell graphs, the hash lookup, runnable networks
//! and the directory of pretrained networks.

pub mod graph;
pub mod lookup;
pub mod network;
pub mod pretrain;
pub mod storage;

pub use graph::{GraphEncoding, NetworkGraph, MAX_VERTICES, NUM_OPERATIONS};
pub use lookup::{load_nasbench, ArchitectureLookup, NasBenchIndex};
pub use network::{CandidateNetwork, CellNetwork, CellNetworkConfig, LayerIo};
pub use storage::{is_net_pretrained, list_pretrained, load_trained_net, save_trained_net, LoadedNetwork};
