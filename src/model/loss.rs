//! Loss functions of the graph autoencoder and the IO head

use burn::{
    nn::loss::{MseLoss, Reduction},
    tensor::{backend::Backend, Tensor},
};

use super::config::{IoLossKind, ReconLossWeights};

const PROB_EPS: f64 = 1e-7;

/// Mean binary cross-entropy between probabilities and 0/1 targets
pub fn binary_cross_entropy<B: Backend, const D: usize>(
    probs: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let probs = probs.clamp(PROB_EPS, 1.0 - PROB_EPS);
    let positive = targets.clone() * probs.clone().log();
    let negative = targets.neg().add_scalar(1.0) * probs.neg().add_scalar(1.0).log();
    (positive + negative).mean().neg()
}

/// Weighted operation/adjacency BCE plus the variational KL term
#[derive(Debug, Clone, Copy)]
pub struct VaeReconstructionLoss {
    pub w_ops: f64,
    pub w_adj: f64,
}

impl From<ReconLossWeights> for VaeReconstructionLoss {
    fn from(w: ReconLossWeights) -> Self {
        Self {
            w_ops: w.w_ops,
            w_adj: w.w_adj,
        }
    }
}

impl VaeReconstructionLoss {
    /// `recon` and `targets` are `(ops, adj)` pairs in DAG space
    pub fn forward<B: Backend>(
        &self,
        recon: (Tensor<B, 3>, Tensor<B, 3>),
        targets: (Tensor<B, 3>, Tensor<B, 3>),
        mu: Tensor<B, 3>,
        logvar: Tensor<B, 3>,
    ) -> Tensor<B, 1> {
        let [n, v, _] = recon.0.dims();
        let loss_ops = binary_cross_entropy(recon.0, targets.0);
        let loss_adj = binary_cross_entropy(recon.1, targets.1);
        let reconstruction = loss_ops.mul_scalar(self.w_ops) + loss_adj.mul_scalar(self.w_adj);

        let kl_terms = logvar
            .clone()
            .mul_scalar(2.0)
            .add_scalar(1.0)
            .sub(mu.powf_scalar(2.0))
            .sub(logvar.exp().powf_scalar(2.0));
        let kld = kl_terms
            .sum_dim(2)
            .mean()
            .mul_scalar(-0.5 / (n * v) as f64);

        reconstruction + kld
    }
}

/// Loss between the reconstructed and the true selected output activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLoss {
    kind: IoLossKind,
}

impl IoLoss {
    pub fn new(kind: IoLossKind) -> Self {
        Self { kind }
    }

    pub fn forward<B: Backend>(&self, prediction: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        match self.kind {
            IoLossKind::Mse => MseLoss::new().forward(prediction, target, Reduction::Mean),
            IoLossKind::L1 => (prediction - target).abs().mean(),
        }
    }
}
