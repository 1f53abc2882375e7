//! Variational graph autoencoder over padded cell graphs.
//!
//! GIN-style message passing encodes each vertex to `mu`/`logvar`; the
//! decoder predicts operation probabilities per vertex and edge probabilities
//! from latent inner products.

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::sigmoid, backend::Backend, Distribution, Tensor},
};

use super::{ForwardOutput, GraphModel, GraphReconstruction};

#[derive(Config, Debug)]
pub struct GraphVaeConfig {
    /// Size of the one-hot operation vocabulary
    pub input_dim: usize,

    #[config(default = "128")]
    pub hidden_dim: usize,

    #[config(default = "16")]
    pub latent_dim: usize,

    /// Message-passing layers
    #[config(default = "5")]
    pub num_layers: usize,

    /// Linear layers inside each message-passing MLP
    #[config(default = "2")]
    pub num_mlp_layers: usize,

    #[config(default = "0.3")]
    pub dropout: f64,
}

impl GraphVaeConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GraphVae<B> {
        let layers = (0..self.num_layers)
            .map(|l| {
                let in_dim = if l == 0 { self.input_dim } else { self.hidden_dim };
                GinLayer::new(in_dim, self.hidden_dim, self.num_mlp_layers, device)
            })
            .collect();

        GraphVae {
            layers,
            fc_mu: LinearConfig::new(self.hidden_dim, self.latent_dim).init(device),
            fc_logvar: LinearConfig::new(self.hidden_dim, self.latent_dim).init(device),
            ops_decoder: LinearConfig::new(self.latent_dim, self.input_dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            latent_dim: self.latent_dim,
        }
    }
}

/// `h = MLP(x + A x)`
#[derive(Module, Debug)]
pub struct GinLayer<B: Backend> {
    mlp: Vec<Linear<B>>,
    relu: Relu,
}

impl<B: Backend> GinLayer<B> {
    fn new(in_dim: usize, hidden_dim: usize, num_mlp_layers: usize, device: &B::Device) -> Self {
        let mlp = (0..num_mlp_layers.max(1))
            .map(|i| {
                let d_in = if i == 0 { in_dim } else { hidden_dim };
                LinearConfig::new(d_in, hidden_dim).init(device)
            })
            .collect();
        Self {
            mlp,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 3>, adj: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut h = adj.matmul(x.clone()) + x;
        for linear in &self.mlp {
            h = self.relu.forward(linear.forward(h));
        }
        h
    }
}

#[derive(Module, Debug)]
pub struct GraphVae<B: Backend> {
    layers: Vec<GinLayer<B>>,
    fc_mu: Linear<B>,
    fc_logvar: Linear<B>,
    ops_decoder: Linear<B>,
    dropout: Dropout,
    latent_dim: usize,
}

impl<B: Backend> GraphVae<B> {
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// `(mu, logvar)`, each `[N, V, latent]`
    pub fn encode(&self, ops: Tensor<B, 3>, adj: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let mut h = ops;
        for layer in &self.layers {
            h = layer.forward(h, adj.clone());
        }
        (self.fc_mu.forward(h.clone()), self.fc_logvar.forward(h))
    }

    /// Sample `z`; deterministic (`z = mu`) outside of training backends.
    /// `logvar` parameterises the log standard deviation.
    pub fn reparameterize(&self, mu: Tensor<B, 3>, logvar: Tensor<B, 3>) -> Tensor<B, 3> {
        if !B::ad_enabled() {
            return mu;
        }
        let eps = Tensor::random(mu.shape(), Distribution::Normal(0.0, 1.0), &mu.device());
        mu + eps * logvar.exp()
    }

    /// `(ops_recon, adj_recon)` probabilities
    pub fn decode(&self, z: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let z = self.dropout.forward(z);
        let ops = sigmoid(self.ops_decoder.forward(z.clone()));
        let adj = sigmoid(z.clone().matmul(z.swap_dims(1, 2)));
        (ops, adj)
    }

    pub fn forward(&self, ops: Tensor<B, 3>, adj: Tensor<B, 3>) -> (GraphReconstruction<B>, Tensor<B, 3>) {
        let (mu, logvar) = self.encode(ops, adj);
        let z = self.reparameterize(mu.clone(), logvar.clone());
        let (ops_recon, adj_recon) = self.decode(z.clone());
        (
            GraphReconstruction {
                ops_recon,
                adj_recon,
                mu,
                logvar,
            },
            z,
        )
    }
}

impl<B: Backend> GraphModel<B> for GraphVae<B> {
    /// The plain autoencoder never consumes IO input.
    fn forward_graph(
        &self,
        ops: Tensor<B, 3>,
        adj: Tensor<B, 3>,
        _io_input: Option<Tensor<B, 4>>,
    ) -> ForwardOutput<B> {
        ForwardOutput::Graph(self.forward(ops, adj).0)
    }
}
