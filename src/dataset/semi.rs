//! Mixed labeled/unlabeled training data
//!
//! Unlabeled data is the set of benchmark graphs; labeled data are the IO
//! records, each paired with the graph of the network that produced it. An
//! epoch emits `k` unlabeled batches, then one labeled batch, and repeats;
//! whatever is left of either kind is appended at the end.

use std::collections::BTreeMap;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::host::HostTensor;
use super::io::{InputRows, IoDataset};
use crate::nasbench::{ArchitectureLookup, GraphEncoding, NetworkGraph, MAX_VERTICES, NUM_OPERATIONS};
use crate::training::batch::{BatchSource, RawBatch};
use crate::utils::error::{InfoNasError, Result};

/// Shapes the label-extended model is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoShapes {
    pub in_channels: usize,
    pub out_channels: usize,
    pub out_size: [usize; 2],
}

impl IoShapes {
    /// Both shapes are `[N, C, H, W]`; `N` is ignored
    pub fn from_shapes(inputs: &[usize], outputs: &[usize]) -> Result<Self> {
        match (inputs, outputs) {
            ([_, c_in, _, _], [_, c_out, h, w]) => Ok(Self {
                in_channels: *c_in,
                out_channels: *c_out,
                out_size: [*h, *w],
            }),
            _ => Err(InfoNasError::Dataset(format!(
                "IO activations must be [N, C, H, W], got {:?} and {:?}",
                inputs, outputs
            ))),
        }
    }
}

/// Indices of the records making up one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedBatch {
    Unlabeled(Vec<usize>),
    Labeled(Vec<usize>),
}

/// Encode every graph, keeping input order
pub fn encode_graphs(graphs: &[(String, NetworkGraph)]) -> Result<Vec<GraphEncoding>> {
    graphs.iter().map(|(_, g)| g.encode()).collect()
}

/// Split unlabeled graphs into (train, held-out) with a seeded shuffle
pub fn split_unlabeled(
    graphs: Vec<GraphEncoding>,
    test_size: f64,
    seed: u64,
) -> Result<(Vec<GraphEncoding>, Vec<GraphEncoding>)> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(InfoNasError::Config(format!(
            "test_size must be in [0, 1), got {}",
            test_size
        )));
    }
    let mut graphs = graphs;
    graphs.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let n_test = (graphs.len() as f64 * test_size).round() as usize;
    let train = graphs.split_off(n_test);
    Ok((train, graphs))
}

/// Graph tensors of a batch of encodings
pub fn graph_tensors<B: Backend>(
    graphs: &[&GraphEncoding],
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let n = graphs.len();
    let adjacency: Vec<f32> = graphs.iter().flat_map(|g| g.adjacency.iter().copied()).collect();
    let operations: Vec<f32> = graphs.iter().flat_map(|g| g.operations.iter().copied()).collect();
    (
        Tensor::from_data(TensorData::new(adjacency, [n, MAX_VERTICES, MAX_VERTICES]), device),
        Tensor::from_data(TensorData::new(operations, [n, MAX_VERTICES, NUM_OPERATIONS]), device),
    )
}

/// Interleave `k` unlabeled batches with one labeled batch
pub fn interleave(unlabeled: Vec<PlannedBatch>, labeled: Vec<PlannedBatch>, k: usize) -> Vec<PlannedBatch> {
    let mut plan = Vec::with_capacity(unlabeled.len() + labeled.len());
    let mut unlabeled = unlabeled.into_iter();
    let mut labeled = labeled.into_iter();
    loop {
        let before = plan.len();
        plan.extend(unlabeled.by_ref().take(k));
        let exhausted = plan.len() - before < k;
        match labeled.next() {
            Some(batch) => plan.push(batch),
            None => {
                plan.extend(unlabeled);
                break;
            }
        }
        if exhausted {
            plan.extend(labeled);
            break;
        }
    }
    plan
}

fn chunk_indices(indices: Vec<usize>, batch_size: usize) -> Vec<Vec<usize>> {
    indices.chunks(batch_size).map(|c| c.to_vec()).collect()
}

/// Unlabeled graphs plus graph-annotated IO records
#[derive(Debug, Clone)]
pub struct SemiSupervisedDataset {
    unlabeled: Vec<GraphEncoding>,
    labeled_graphs: Vec<GraphEncoding>,
    labeled_inputs: InputRows,
    labeled_outputs: HostTensor,
    batch_size: usize,
    k: usize,
}

impl SemiSupervisedDataset {
    /// Resolve every record's graph through `lookup`. Reference inputs stay
    /// indices until their batch is materialized.
    pub fn new(
        unlabeled: Vec<GraphEncoding>,
        io: &IoDataset,
        lookup: &dyn ArchitectureLookup,
        batch_size: usize,
        k: usize,
    ) -> Result<Self> {
        if batch_size == 0 || k == 0 {
            return Err(InfoNasError::Config(
                "batch_size and k must be positive".to_string(),
            ));
        }
        io.validate()?;

        let mut encodings: BTreeMap<&str, GraphEncoding> = BTreeMap::new();
        let mut labeled_graphs = Vec::with_capacity(io.len());
        for hash in &io.net_hashes {
            if !encodings.contains_key(hash.as_str()) {
                encodings.insert(hash.as_str(), lookup.graph(hash)?.encode()?);
            }
            labeled_graphs.push(encodings[hash.as_str()].clone());
        }

        let labeled_inputs = io.input_rows()?;
        IoShapes::from_shapes(labeled_inputs.storage_shape(), &io.outputs.shape)?;

        info!(
            "Semi-supervised dataset: {} unlabeled graphs, {} labeled records from {} networks",
            unlabeled.len(),
            labeled_graphs.len(),
            encodings.len()
        );
        Ok(Self {
            unlabeled,
            labeled_graphs,
            labeled_inputs,
            labeled_outputs: io.outputs.clone(),
            batch_size,
            k,
        })
    }

    pub fn io_shapes(&self) -> Result<IoShapes> {
        IoShapes::from_shapes(self.labeled_inputs.storage_shape(), &self.labeled_outputs.shape)
    }

    pub fn num_unlabeled(&self) -> usize {
        self.unlabeled.len()
    }

    pub fn num_labeled(&self) -> usize {
        self.labeled_graphs.len()
    }

    /// Shuffled batch plan of one epoch
    pub fn plan_epoch<R: Rng>(&self, rng: &mut R) -> Vec<PlannedBatch> {
        let mut unlabeled: Vec<usize> = (0..self.unlabeled.len()).collect();
        unlabeled.shuffle(rng);
        let mut labeled: Vec<usize> = (0..self.labeled_graphs.len()).collect();
        labeled.shuffle(rng);

        let unlabeled = chunk_indices(unlabeled, self.batch_size)
            .into_iter()
            .map(PlannedBatch::Unlabeled)
            .collect();
        let labeled = chunk_indices(labeled, self.batch_size)
            .into_iter()
            .map(PlannedBatch::Labeled)
            .collect();
        interleave(unlabeled, labeled, self.k)
    }

    /// Upload the records of a planned batch
    pub fn materialize<B: Backend>(&self, planned: &PlannedBatch, device: &B::Device) -> Result<RawBatch<B>> {
        match planned {
            PlannedBatch::Unlabeled(indices) => {
                let graphs = select(&self.unlabeled, indices)?;
                let (adjacency, operations) = graph_tensors::<B>(&graphs, device);
                Ok(RawBatch::unlabeled(adjacency, operations))
            }
            PlannedBatch::Labeled(indices) => {
                let graphs = select(&self.labeled_graphs, indices)?;
                let (adjacency, operations) = graph_tensors::<B>(&graphs, device);
                let inputs = self.labeled_inputs.select(indices)?.to_tensor::<B, 4>(device)?;
                let outputs = self.labeled_outputs.select_rows(indices)?.to_tensor::<B, 4>(device)?;
                Ok(RawBatch::labeled(adjacency, operations, inputs, outputs))
            }
        }
    }

    /// Every labeled record in order, for evaluation
    pub fn labeled_batches<B: Backend>(&self, device: &B::Device) -> Result<Vec<RawBatch<B>>> {
        chunk_indices((0..self.num_labeled()).collect(), self.batch_size)
            .into_iter()
            .map(|indices| self.materialize(&PlannedBatch::Labeled(indices), device))
            .collect()
    }
}

fn select<'a>(graphs: &'a [GraphEncoding], indices: &[usize]) -> Result<Vec<&'a GraphEncoding>> {
    indices
        .iter()
        .map(|&i| {
            graphs.get(i).ok_or(InfoNasError::IndexOutOfRange {
                kind: "graph",
                index: i as isize,
                len: graphs.len(),
            })
        })
        .collect()
}

impl<B: Backend> BatchSource<B> for SemiSupervisedDataset {
    fn epoch_batches(&self, rng: &mut ChaCha8Rng, device: &B::Device) -> Result<Vec<RawBatch<B>>> {
        let plan = self.plan_epoch(rng);
        debug!("Epoch plan: {} batches", plan.len());
        plan.iter().map(|p| self.materialize(p, device)).collect()
    }
}

/// Unlabeled graphs batched in order, for evaluation
pub fn unlabeled_batches<B: Backend>(
    graphs: &[GraphEncoding],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<RawBatch<B>>> {
    if batch_size == 0 {
        return Err(InfoNasError::Config("batch size must be positive".to_string()));
    }
    Ok(graphs
        .chunks(batch_size)
        .map(|chunk| {
            let refs: Vec<&GraphEncoding> = chunk.iter().collect();
            let (adjacency, operations) = graph_tensors::<B>(&refs, device);
            RawBatch::unlabeled(adjacency, operations)
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::extract::tests::{indexed_set, TaggedNet};
    use crate::dataset::extract::SelectedInputs;
    use crate::dataset::io::create_io_dataset;
    use crate::model::config::IoConfig;
    use crate::nasbench::graph::tests::sample_graph;
    use crate::nasbench::NasBenchIndex;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn u(i: usize) -> PlannedBatch {
        PlannedBatch::Unlabeled(vec![i])
    }

    fn l(i: usize) -> PlannedBatch {
        PlannedBatch::Labeled(vec![i])
    }

    /// Index with `net0..net2`, all mapped to the sample graph
    pub(crate) fn sample_index() -> NasBenchIndex {
        let mut index = NasBenchIndex::new();
        for i in 0..3 {
            index.insert(format!("net{}", i), sample_graph());
        }
        index
    }

    /// Semi-supervised data over 1x1 activations from tagged nets
    pub(crate) fn sample_dataset(n_unlabeled: usize, batch_size: usize, k: usize) -> SemiSupervisedDataset {
        let nets: Vec<(String, TaggedNet)> = (0..3)
            .map(|i| (format!("net{}", i), TaggedNet { tag: i as f32 }))
            .collect();
        let io = create_io_dataset::<TestBackend, _>(
            &nets,
            &indexed_set(4),
            4,
            &IoConfig::new(0, -1),
            Some(1),
            &Default::default(),
        )
        .unwrap();
        let encoding = sample_graph().encode().unwrap();
        SemiSupervisedDataset::new(vec![encoding; n_unlabeled], &io, &sample_index(), batch_size, k).unwrap()
    }

    #[test]
    fn test_interleave_pattern() {
        let plan = interleave((0..5).map(u).collect(), (0..2).map(l).collect(), 2);
        assert_eq!(plan, vec![u(0), u(1), l(0), u(2), u(3), l(1), u(4)]);
    }

    #[test]
    fn test_interleave_appends_leftover_labeled() {
        let plan = interleave((0..3).map(u).collect(), (0..4).map(l).collect(), 2);
        assert_eq!(plan, vec![u(0), u(1), l(0), u(2), l(1), l(2), l(3)]);

        let plan = interleave(Vec::new(), (0..2).map(l).collect(), 3);
        assert_eq!(plan, vec![l(0), l(1)]);
    }

    #[test]
    fn test_plan_covers_every_record_once() {
        let dataset = sample_dataset(10, 4, 2);
        let plan = dataset.plan_epoch(&mut ChaCha8Rng::seed_from_u64(0));

        let mut unlabeled = Vec::<usize>::new();
        let mut labeled = Vec::<usize>::new();
        for batch in &plan {
            match batch {
                PlannedBatch::Unlabeled(i) => unlabeled.extend(i.iter().copied()),
                PlannedBatch::Labeled(i) => labeled.extend(i.iter().copied()),
            }
        }
        unlabeled.sort();
        labeled.sort();
        assert_eq!(unlabeled, (0..10).collect::<Vec<_>>());
        assert_eq!(labeled, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_materialized_arity_and_shapes() {
        let dataset = sample_dataset(5, 4, 1);
        let batches: Vec<RawBatch<TestBackend>> = dataset
            .epoch_batches(&mut ChaCha8Rng::seed_from_u64(3), &Default::default())
            .unwrap();
        assert_eq!(batches.len(), 2 + 3);
        assert_eq!(batches[0].arity(), 2);
        assert_eq!(batches[1].arity(), 4);
        assert_eq!(batches[1].adjacency.dims(), [4, 7, 7]);
        assert_eq!(batches[1].extras[0].dims(), [4, 1, 1, 1]);
        assert_eq!(
            dataset.io_shapes().unwrap(),
            IoShapes {
                in_channels: 1,
                out_channels: 1,
                out_size: [1, 1]
            }
        );
    }

    #[test]
    fn test_reference_inputs_resolve_per_batch() {
        let nets = vec![("net0".to_string(), TaggedNet { tag: 0.0 })];
        let io = create_io_dataset::<TestBackend, _>(
            &nets,
            &indexed_set(6),
            4,
            &IoConfig::new(0, -1),
            Some(5),
            &Default::default(),
        )
        .unwrap();
        let SelectedInputs::Reference(indices) = &io.inputs else {
            panic!("expected reference inputs");
        };
        let dataset = SemiSupervisedDataset::new(Vec::new(), &io, &sample_index(), 2, 1).unwrap();

        let batch = dataset
            .materialize::<TestBackend>(&PlannedBatch::Labeled(vec![3, 1]), &Default::default())
            .unwrap();
        let inputs = batch.extras[0].clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(inputs, vec![indices[3] as f32, indices[1] as f32]);
    }

    #[test]
    fn test_unknown_hash_fails() {
        let nets = vec![("missing".to_string(), TaggedNet { tag: 0.0 })];
        let io = create_io_dataset::<TestBackend, _>(
            &nets,
            &indexed_set(2),
            2,
            &IoConfig::new(0, -1),
            Some(1),
            &Default::default(),
        )
        .unwrap();
        assert!(SemiSupervisedDataset::new(Vec::new(), &io, &sample_index(), 2, 1).is_err());
    }

    #[test]
    fn test_split_unlabeled() {
        let graphs = vec![sample_graph().encode().unwrap(); 10];
        let (train, test) = split_unlabeled(graphs, 0.3, 1).unwrap();
        assert_eq!(train.len(), 7);
        assert_eq!(test.len(), 3);
        assert!(split_unlabeled(Vec::new(), 1.5, 1).is_err());
    }

    #[test]
    fn test_unlabeled_batches_in_order() {
        let graphs = vec![sample_graph().encode().unwrap(); 5];
        let batches = unlabeled_batches::<TestBackend>(&graphs, 2, &Default::default()).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].operations.dims(), [1, 7, 5]);
    }
}
