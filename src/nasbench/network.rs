//! Runnable candidate networks
//!
//! [`CellNetwork`] stacks copies of one cell graph the way the benchmark
//! builds its networks: a stem convolution, several stacks of cells with
//! max-pool downsampling in between, global pooling and a linear classifier.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::graph::{CellOperation, NetworkGraph};
use crate::utils::error::Result as NetResult;

/// Inputs and outputs of every layer of a network for one batch.
///
/// `inputs[0]` is the raw image batch; `inputs[i]` feeds the layer that
/// produced `outputs[i]`.
#[derive(Debug, Clone)]
pub struct LayerIo<B: Backend> {
    pub inputs: Vec<Tensor<B, 4>>,
    pub outputs: Vec<Tensor<B, 4>>,
}

/// A trained network whose per-layer activations can be extracted
pub trait CandidateNetwork<B: Backend> {
    /// Class logits `[batch, labels]`
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Per-layer inputs and outputs
    fn layer_io(&self, images: Tensor<B, 4>) -> LayerIo<B>;
}

#[derive(Config, Debug)]
pub struct CellNetworkConfig {
    #[config(default = "3")]
    pub in_channels: usize,

    #[config(default = "16")]
    pub stem_channels: usize,

    #[config(default = "3")]
    pub num_stacks: usize,

    #[config(default = "3")]
    pub cells_per_stack: usize,

    #[config(default = "10")]
    pub num_labels: usize,
}

impl CellNetworkConfig {
    /// Instantiate a network executing `graph` in every cell
    pub fn init<B: Backend>(&self, graph: &NetworkGraph, device: &B::Device) -> NetResult<CellNetwork<B>> {
        graph.validate()?;
        let stem = ConvBnRelu::new(self.in_channels, self.stem_channels, 3, device);

        let mut channels = self.stem_channels;
        let mut stacks = Vec::with_capacity(self.num_stacks);
        for stack_idx in 0..self.num_stacks {
            let downsample = if stack_idx > 0 {
                Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
            } else {
                None
            };
            let out_channels = if stack_idx > 0 { channels * 2 } else { channels };

            let mut cells = Vec::with_capacity(self.cells_per_stack);
            for _ in 0..self.cells_per_stack {
                cells.push(Cell::new(graph, channels, out_channels, device)?);
                channels = out_channels;
            }
            stacks.push(Stack { downsample, cells });
        }

        Ok(CellNetwork {
            stem,
            stacks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: LinearConfig::new(channels, self.num_labels).init(device),
        })
    }
}

/// Convolution, batch normalisation and ReLU
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// One intermediate vertex: either a convolution or a pooling op
#[derive(Module, Debug)]
pub struct CellVertex<B: Backend> {
    conv: Option<ConvBnRelu<B>>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> CellVertex<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match (&self.conv, &self.pool) {
            (Some(conv), _) => conv.forward(x),
            (None, Some(pool)) => pool.forward(x),
            (None, None) => x,
        }
    }
}

/// A cell executing its DAG on a fixed channel width
#[derive(Module, Debug)]
pub struct Cell<B: Backend> {
    projection: ConvBnRelu<B>,
    vertices: Vec<CellVertex<B>>,
    /// Bitmask of predecessors for every vertex
    predecessors: Vec<usize>,
}

impl<B: Backend> Cell<B> {
    fn new(
        graph: &NetworkGraph,
        in_channels: usize,
        channels: usize,
        device: &B::Device,
    ) -> NetResult<Self> {
        let operations = graph.operations()?;
        let n = operations.len();

        let vertices = operations[1..n - 1]
            .iter()
            .map(|op| match op {
                CellOperation::Conv1x1 => CellVertex {
                    conv: Some(ConvBnRelu::new(channels, channels, 1, device)),
                    pool: None,
                },
                CellOperation::Conv3x3 => CellVertex {
                    conv: Some(ConvBnRelu::new(channels, channels, 3, device)),
                    pool: None,
                },
                CellOperation::MaxPool3x3 => CellVertex {
                    conv: None,
                    pool: Some(
                        MaxPool2dConfig::new([3, 3])
                            .with_strides([1, 1])
                            .with_padding(PaddingConfig2d::Explicit(1, 1))
                            .init(),
                    ),
                },
                CellOperation::Input | CellOperation::Output => CellVertex {
                    conv: None,
                    pool: None,
                },
            })
            .collect();

        let predecessors = graph
            .predecessors()
            .into_iter()
            .map(|preds| preds.into_iter().fold(0usize, |mask, p| mask | (1 << p)))
            .collect();

        Ok(Self {
            projection: ConvBnRelu::new(in_channels, channels, 1, device),
            vertices,
            predecessors,
        })
    }

    /// Sum of the states feeding `vertex`, `None` when it has no inputs
    fn aggregate(&self, vertex: usize, states: &[Tensor<B, 4>]) -> Option<Tensor<B, 4>> {
        let mask = self.predecessors[vertex];
        states
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, s)| s.clone())
            .reduce(|acc, s| acc + s)
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let input = self.projection.forward(x);
        let mut states = vec![input.clone()];
        for (k, vertex) in self.vertices.iter().enumerate() {
            let agg = self
                .aggregate(k + 1, &states)
                .unwrap_or_else(|| input.clone());
            states.push(vertex.forward(agg));
        }
        self.aggregate(self.predecessors.len() - 1, &states)
            .unwrap_or(input)
    }
}

#[derive(Module, Debug)]
pub struct Stack<B: Backend> {
    downsample: Option<MaxPool2d>,
    cells: Vec<Cell<B>>,
}

/// Candidate network built from a single repeated cell
#[derive(Module, Debug)]
pub struct CellNetwork<B: Backend> {
    stem: ConvBnRelu<B>,
    stacks: Vec<Stack<B>>,
    pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> CellNetwork<B> {
    /// Stem, downsampling pools and cells, in execution order
    pub fn num_layers(&self) -> usize {
        1 + self
            .stacks
            .iter()
            .map(|s| s.cells.len() + usize::from(s.downsample.is_some()))
            .sum::<usize>()
    }

    fn features(&self, images: Tensor<B, 4>, mut io: Option<&mut LayerIo<B>>) -> Tensor<B, 4> {
        let mut record = |input: &Tensor<B, 4>, output: &Tensor<B, 4>| {
            if let Some(io) = io.as_deref_mut() {
                io.inputs.push(input.clone());
                io.outputs.push(output.clone());
            }
        };

        let mut x = self.stem.forward(images.clone());
        record(&images, &x);
        for stack in &self.stacks {
            if let Some(pool) = &stack.downsample {
                let y = pool.forward(x.clone());
                record(&x, &y);
                x = y;
            }
            for cell in &stack.cells {
                let y = cell.forward(x.clone());
                record(&x, &y);
                x = y;
            }
        }
        x
    }
}

impl<B: Backend> CandidateNetwork<B> for CellNetwork<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(images, None);
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        self.classifier.forward(x)
    }

    fn layer_io(&self, images: Tensor<B, 4>) -> LayerIo<B> {
        let mut io = LayerIo {
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        self.features(images, Some(&mut io));
        io
    }
}
