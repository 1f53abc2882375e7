//! Cell graphs of candidate architectures
//!
//! A candidate cell is a DAG over at most [`MAX_VERTICES`] vertices: vertex 0
//! is the cell input, the last vertex the cell output, every other vertex one
//! operation from [`OPERATIONS`].

use serde::{Deserialize, Serialize};

use crate::utils::error::{InfoNasError, Result};

/// Maximum number of vertices in a cell
pub const MAX_VERTICES: usize = 7;

/// Operation vocabulary, in one-hot order
pub const OPERATIONS: [&str; 5] = [
    "input",
    "conv1x1-bn-relu",
    "conv3x3-bn-relu",
    "maxpool3x3",
    "output",
];

/// Number of operation classes in the one-hot encoding
pub const NUM_OPERATIONS: usize = OPERATIONS.len();

/// Operation executed by an intermediate vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellOperation {
    Input,
    Conv1x1,
    Conv3x3,
    MaxPool3x3,
    Output,
}

impl CellOperation {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "input" => Ok(CellOperation::Input),
            "conv1x1-bn-relu" => Ok(CellOperation::Conv1x1),
            "conv3x3-bn-relu" => Ok(CellOperation::Conv3x3),
            "maxpool3x3" => Ok(CellOperation::MaxPool3x3),
            "output" => Ok(CellOperation::Output),
            other => Err(InfoNasError::InvalidInput(format!(
                "unknown cell operation '{}'",
                other
            ))),
        }
    }

    /// Position in the one-hot vocabulary
    pub fn index(&self) -> usize {
        match self {
            CellOperation::Input => 0,
            CellOperation::Conv1x1 => 1,
            CellOperation::Conv3x3 => 2,
            CellOperation::MaxPool3x3 => 3,
            CellOperation::Output => 4,
        }
    }
}

/// Operations list plus upper-triangular adjacency matrix of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub ops: Vec<String>,
    pub adjacency: Vec<Vec<u8>>,
}

impl NetworkGraph {
    /// Build and validate a graph
    pub fn new(ops: Vec<String>, adjacency: Vec<Vec<u8>>) -> Result<Self> {
        let graph = Self { ops, adjacency };
        graph.validate()?;
        Ok(graph)
    }

    pub fn num_vertices(&self) -> usize {
        self.ops.len()
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.ops.len();
        if n < 2 || n > MAX_VERTICES {
            return Err(InfoNasError::InvalidInput(format!(
                "cell must have between 2 and {} vertices, got {}",
                MAX_VERTICES, n
            )));
        }
        if self.adjacency.len() != n || self.adjacency.iter().any(|row| row.len() != n) {
            return Err(InfoNasError::ShapeMismatch {
                context: "adjacency matrix rows".to_string(),
                expected: n,
                actual: self.adjacency.len(),
            });
        }
        let operations = self.operations()?;
        if operations[0] != CellOperation::Input || operations[n - 1] != CellOperation::Output {
            return Err(InfoNasError::InvalidInput(
                "cell must start with 'input' and end with 'output'".to_string(),
            ));
        }
        for (i, row) in self.adjacency.iter().enumerate() {
            for (j, &edge) in row.iter().enumerate() {
                if edge > 1 || (edge == 1 && j <= i) {
                    return Err(InfoNasError::InvalidInput(format!(
                        "adjacency entry ({}, {}) = {} breaks the upper-triangular 0/1 DAG form",
                        i, j, edge
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn operations(&self) -> Result<Vec<CellOperation>> {
        self.ops.iter().map(|op| CellOperation::parse(op)).collect()
    }

    /// Predecessor lists, one per vertex
    pub fn predecessors(&self) -> Vec<Vec<usize>> {
        let n = self.num_vertices();
        (0..n)
            .map(|j| (0..n).filter(|&i| self.adjacency[i][j] == 1).collect())
            .collect()
    }

    /// Padded one-hot encoding consumed by the graph autoencoder
    pub fn encode(&self) -> Result<GraphEncoding> {
        let operations = self.operations()?;
        let n = operations.len();
        // the output vertex always occupies the last padded slot
        let slot = |v: usize| if v == n - 1 { MAX_VERTICES - 1 } else { v };

        let mut adjacency = vec![0.0f32; MAX_VERTICES * MAX_VERTICES];
        for (i, row) in self.adjacency.iter().enumerate() {
            for (j, &edge) in row.iter().enumerate() {
                if edge == 1 {
                    adjacency[slot(i) * MAX_VERTICES + slot(j)] = 1.0;
                }
            }
        }

        let mut one_hot = vec![0.0f32; MAX_VERTICES * NUM_OPERATIONS];
        for (v, op) in operations.iter().enumerate() {
            one_hot[slot(v) * NUM_OPERATIONS + op.index()] = 1.0;
        }

        Ok(GraphEncoding {
            adjacency,
            operations: one_hot,
        })
    }
}

/// Fixed-size tensor encoding of a cell: `[7, 7]` adjacency, `[7, 5]` one-hot ops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEncoding {
    pub adjacency: Vec<f32>,
    pub operations: Vec<f32>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// input -> conv3x3 -> maxpool -> output, plus a skip input -> output
    pub(crate) fn sample_graph() -> NetworkGraph {
        NetworkGraph::new(
            vec![
                "input".into(),
                "conv3x3-bn-relu".into(),
                "maxpool3x3".into(),
                "output".into(),
            ],
            vec![
                vec![0, 1, 0, 1],
                vec![0, 0, 1, 0],
                vec![0, 0, 0, 1],
                vec![0, 0, 0, 0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_lower_triangular_edges() {
        let result = NetworkGraph::new(
            vec!["input".into(), "output".into()],
            vec![vec![0, 0], vec![1, 0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_operation() {
        let result = NetworkGraph::new(
            vec!["input".into(), "conv5x5".into(), "output".into()],
            vec![vec![0, 1, 0], vec![0, 0, 1], vec![0, 0, 0]],
        );
        assert!(matches!(result, Err(InfoNasError::InvalidInput(_))));
    }

    #[test]
    fn test_predecessors() {
        let preds = sample_graph().predecessors();
        assert_eq!(preds[0], Vec::<usize>::new());
        assert_eq!(preds[1], vec![0]);
        assert_eq!(preds[3], vec![0, 2]);
    }

    #[test]
    fn test_encoding_pads_before_output() {
        let enc = sample_graph().encode().unwrap();
        assert_eq!(enc.adjacency.len(), 49);
        assert_eq!(enc.operations.len(), 35);

        // output moved to slot 6
        assert_eq!(enc.operations[6 * NUM_OPERATIONS + 4], 1.0);
        // padded slots 3..6 carry no operation
        assert!(enc.operations[3 * NUM_OPERATIONS..6 * NUM_OPERATIONS]
            .iter()
            .all(|v| *v == 0.0));
        // skip edge input -> output and maxpool -> output
        assert_eq!(enc.adjacency[6], 1.0);
        assert_eq!(enc.adjacency[2 * MAX_VERTICES + 6], 1.0);
        assert_eq!(enc.adjacency.iter().sum::<f32>(), 4.0);
    }
}
