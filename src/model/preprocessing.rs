//! Reversible adjacency preprocessing applied before the graph autoencoder.
//!
//! Losses are computed after [`PrepReverse::reverse`] so that they live in the
//! original upper-triangular DAG representation.

use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Adjacency transform selected by the hyperparameter registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrepMethod {
    /// Leave the DAG untouched
    Identity,
    /// `lbd * A + (1 - lbd) * A^T`
    Bidirectional { lbd: f64 },
    /// `A + triu(A, 1)^T`, a symmetric adjacency
    Undirected,
}

/// Maps preprocessed (or reconstructed) tensors back to DAG space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepReverse {
    method: PrepMethod,
}

/// `[1, n, n]` mask with ones strictly above the diagonal
fn strict_upper_mask<B: Backend>(n: usize, device: &B::Device) -> Tensor<B, 3> {
    let values: Vec<f32> = (0..n * n)
        .map(|k| if k % n > k / n { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_data(TensorData::new(values, [1, n, n]), device)
}

fn triu1<B: Backend>(adj: Tensor<B, 3>) -> Tensor<B, 3> {
    let n = adj.dims()[1];
    let mask = strict_upper_mask::<B>(n, &adj.device());
    adj * mask
}

/// Apply `method` to a batch of adjacency matrices `[N, V, V]` and one-hot
/// operations `[N, V, O]`.
pub fn preprocess<B: Backend>(
    adj: Tensor<B, 3>,
    ops: Tensor<B, 3>,
    method: PrepMethod,
) -> (Tensor<B, 3>, Tensor<B, 3>, PrepReverse) {
    let adj = match method {
        PrepMethod::Identity => adj,
        PrepMethod::Bidirectional { lbd } => {
            adj.clone().mul_scalar(lbd) + adj.swap_dims(1, 2).mul_scalar(1.0 - lbd)
        }
        PrepMethod::Undirected => adj.clone() + triu1(adj).swap_dims(1, 2),
    };
    (adj, ops, PrepReverse { method })
}

impl PrepReverse {
    pub fn reverse<B: Backend>(&self, adj: Tensor<B, 3>, ops: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let adj = match self.method {
            PrepMethod::Identity => adj,
            PrepMethod::Bidirectional { lbd } => triu1(adj.div_scalar(lbd)),
            PrepMethod::Undirected => triu1(adj),
        };
        (adj, ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn dag() -> Tensor<TestBackend, 3> {
        let values = vec![
            0.0, 1.0, 1.0, //
            0.0, 0.0, 1.0, //
            0.0, 0.0, 0.0,
        ];
        Tensor::from_data(TensorData::new(values, [1, 3, 3]), &Default::default())
    }

    fn ops() -> Tensor<TestBackend, 3> {
        Tensor::ones([1, 3, 2], &Default::default())
    }

    fn to_vec(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_undirected_is_symmetric_and_reversible() {
        let (adj, _, reverse) = preprocess(dag(), ops(), PrepMethod::Undirected);
        let values = to_vec(adj.clone());
        assert_eq!(values[1], values[3]);
        assert_eq!(values[2], values[6]);

        let (back, _) = reverse.reverse(adj, ops());
        assert_eq!(to_vec(back), to_vec(dag()));
    }

    #[test]
    fn test_bidirectional_reverse() {
        let method = PrepMethod::Bidirectional { lbd: 0.5 };
        let (adj, _, reverse) = preprocess(dag(), ops(), method);
        assert!((to_vec(adj.clone())[3] - 0.5).abs() < 1e-6);

        let (back, _) = reverse.reverse(adj, ops());
        for (a, b) in to_vec(back).iter().zip(to_vec(dag()).iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identity() {
        let (adj, ops_out, reverse) = preprocess(dag(), ops(), PrepMethod::Identity);
        assert_eq!(to_vec(adj.clone()), to_vec(dag()));
        assert_eq!(to_vec(ops_out), to_vec(ops()));
        assert_eq!(to_vec(reverse.reverse(adj, ops()).0), to_vec(dag()));
    }
}
