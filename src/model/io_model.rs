//! Label-extended autoencoder: predicts a candidate network's selected layer
//! output from its selected layer input and the architecture embedding.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::config::ModelKwargs;
use super::vae::GraphVae;
use super::{ForwardOutput, GraphModel};

#[derive(Config, Debug)]
pub struct ConcatIoModelConfig {
    /// Channels of the selected input activation
    pub in_channels: usize,
    /// Channels of the selected output activation
    pub out_channels: usize,
    /// Spatial size `[H, W]` of the selected output activation
    pub out_size: [usize; 2],

    #[config(default = "32")]
    pub hidden_channels: usize,

    #[config(default = "2")]
    pub n_steps: usize,

    #[config(default = "2")]
    pub n_convs: usize,

    #[config(default = "false")]
    pub use_3x3_for_z: bool,

    #[config(default = "false")]
    pub use_3x3_for_output: bool,
}

impl ConcatIoModelConfig {
    /// Configuration from the `model_kwargs` table plus data-derived shapes
    pub fn from_kwargs(
        kwargs: &ModelKwargs,
        in_channels: usize,
        out_channels: usize,
        out_size: [usize; 2],
    ) -> Self {
        Self::new(in_channels, out_channels, out_size)
            .with_hidden_channels(kwargs.hidden_channels)
            .with_n_steps(kwargs.n_steps)
            .with_n_convs(kwargs.n_convs)
            .with_use_3x3_for_z(kwargs.use_3x3_for_z)
            .with_use_3x3_for_output(kwargs.use_3x3_for_output)
    }

    /// Wrap `vae`; its latent size determines the broadcast embedding width
    pub fn init<B: Backend>(&self, vae: GraphVae<B>, device: &B::Device) -> ConcatIoModel<B> {
        let conv = |c_in: usize, c_out: usize, kernel: usize| -> Conv2d<B> {
            Conv2dConfig::new([c_in, c_out], [kernel, kernel])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let latent = vae.latent_dim();
        let hidden = self.hidden_channels;

        let input_convs = (0..self.n_convs)
            .map(|i| conv(if i == 0 { self.in_channels } else { hidden }, hidden, 3))
            .collect();
        // with no input convolutions the raw input is concatenated directly
        let first_width = if self.n_convs == 0 { self.in_channels } else { hidden };
        let z_kernel = if self.use_3x3_for_z { 3 } else { 1 };
        let step_convs = (0..self.n_steps)
            .map(|i| conv(if i == 0 { first_width } else { hidden } + latent, hidden, z_kernel))
            .collect();
        let out_kernel = if self.use_3x3_for_output { 3 } else { 1 };

        ConcatIoModel {
            vae,
            input_convs,
            step_convs,
            output_conv: conv(hidden, self.out_channels, out_kernel),
            output_pool: AdaptiveAvgPool2dConfig::new(self.out_size).init(),
            relu: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ConcatIoModel<B: Backend> {
    pub vae: GraphVae<B>,
    input_convs: Vec<Conv2d<B>>,
    step_convs: Vec<Conv2d<B>>,
    output_conv: Conv2d<B>,
    output_pool: AdaptiveAvgPool2d,
    relu: Relu,
}

impl<B: Backend> ConcatIoModel<B> {
    /// Decode the output activation from `inputs` and the latent sample `z`
    pub fn decode_io(&self, inputs: Tensor<B, 4>, z: Tensor<B, 3>) -> Tensor<B, 4> {
        let [n, _, h, w] = inputs.dims();
        let latent = z.dims()[2];

        // one embedding per graph, broadcast over the activation map
        let z_vec = z.mean_dim(1).reshape([n, latent, 1, 1]);
        let z_map = Tensor::<B, 4>::ones([n, latent, h, w], &inputs.device()) * z_vec;

        let mut x = inputs;
        for conv in &self.input_convs {
            x = self.relu.forward(conv.forward(x));
        }
        for conv in &self.step_convs {
            x = self.relu.forward(conv.forward(Tensor::cat(vec![x, z_map.clone()], 1)));
        }
        self.output_pool.forward(self.output_conv.forward(x))
    }
}

impl<B: Backend> GraphModel<B> for ConcatIoModel<B> {
    /// Six outputs with IO input, otherwise the wrapped autoencoder's four.
    fn forward_graph(
        &self,
        ops: Tensor<B, 3>,
        adj: Tensor<B, 3>,
        io_input: Option<Tensor<B, 4>>,
    ) -> ForwardOutput<B> {
        let (graph, z) = self.vae.forward(ops, adj);
        match io_input {
            Some(inputs) => {
                let io_recon = self.decode_io(inputs, z.clone());
                ForwardOutput::Extended { graph, z, io_recon }
            }
            None => ForwardOutput::Graph(graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::vae::GraphVaeConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn model(kwargs: &ModelKwargs) -> ConcatIoModel<TestBackend> {
        let device = Default::default();
        let vae = GraphVaeConfig::new(5)
            .with_hidden_dim(8)
            .with_latent_dim(4)
            .with_num_layers(1)
            .init(&device);
        ConcatIoModelConfig::from_kwargs(kwargs, 3, 6, [2, 2]).init(vae, &device)
    }

    #[test]
    fn test_extended_output() {
        let device = Default::default();
        let kwargs = ModelKwargs {
            hidden_channels: 8,
            ..ModelKwargs::default()
        };
        let model = model(&kwargs);
        let out = model.forward_graph(
            Tensor::ones([2, 7, 5], &device),
            Tensor::zeros([2, 7, 7], &device),
            Some(Tensor::ones([2, 3, 8, 8], &device)),
        );
        assert_eq!(out.arity(), 6);
        assert_eq!(out.io_recon().unwrap().dims(), [2, 6, 2, 2]);
    }

    #[test]
    fn test_without_io_input_returns_graph_output() {
        let device = Default::default();
        let model = model(&ModelKwargs::default());
        let out = model.forward_graph(
            Tensor::ones([1, 7, 5], &device),
            Tensor::zeros([1, 7, 7], &device),
            None,
        );
        assert_eq!(out.arity(), 4);
        assert!(out.io_recon().is_none());
    }

    #[test]
    fn test_kernel_options_and_no_input_convs() {
        let device = Default::default();
        let kwargs = ModelKwargs {
            n_steps: 1,
            n_convs: 0,
            use_3x3_for_z: true,
            use_3x3_for_output: true,
            hidden_channels: 4,
        };
        let model = model(&kwargs);
        let out = model.forward_graph(
            Tensor::ones([1, 7, 5], &device),
            Tensor::zeros([1, 7, 7], &device),
            Some(Tensor::ones([1, 3, 4, 4], &device)),
        );
        assert_eq!(out.io_recon().unwrap().dims(), [1, 6, 2, 2]);
    }
}
