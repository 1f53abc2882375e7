//! Architecture lookup: content hash -> cell graph

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::graph::NetworkGraph;
use crate::utils::error::{InfoNasError, Result};

/// Resolves an architecture hash to its cell graph
pub trait ArchitectureLookup {
    fn graph(&self, hash: &str) -> Result<NetworkGraph>;
}

/// Benchmark index stored as a JSON object `{hash: {ops, adjacency}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NasBenchIndex {
    graphs: BTreeMap<String, NetworkGraph>,
}

impl NasBenchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate every graph of an index file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(InfoNasError::PathNotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path)?;
        let graphs: BTreeMap<String, NetworkGraph> = serde_json::from_str(&json)?;
        for graph in graphs.values() {
            graph.validate()?;
        }
        info!("Loaded {} architectures from {:?}", graphs.len(), path);
        Ok(Self { graphs })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.graphs)?)?;
        Ok(())
    }

    pub fn insert(&mut self, hash: impl Into<String>, graph: NetworkGraph) {
        self.graphs.insert(hash.into(), graph);
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// All (hash, graph) pairs sorted by hash
    pub fn entries(&self) -> impl Iterator<Item = (&String, &NetworkGraph)> {
        self.graphs.iter()
    }
}

impl ArchitectureLookup for NasBenchIndex {
    fn graph(&self, hash: &str) -> Result<NetworkGraph> {
        self.graphs
            .get(hash)
            .cloned()
            .ok_or_else(|| InfoNasError::Dataset(format!("unknown architecture hash '{}'", hash)))
    }
}

/// Every architecture of an index file as (hash, graph), in hash order
pub fn load_nasbench(path: &Path) -> Result<Vec<(String, NetworkGraph)>> {
    let index = NasBenchIndex::load(path)?;
    Ok(index.graphs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nasbench::graph::tests::sample_graph;
    use tempfile::TempDir;

    #[test]
    fn test_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nasbench.json");

        let mut index = NasBenchIndex::new();
        index.insert("bbb", sample_graph());
        index.insert("aaa", sample_graph());
        index.save(&path).unwrap();

        let loaded = load_nasbench(&path).unwrap();
        let hashes: Vec<&str> = loaded.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(hashes, vec!["aaa", "bbb"]);
        assert_eq!(loaded[0].1, sample_graph());
    }

    #[test]
    fn test_unknown_hash() {
        let index = NasBenchIndex::new();
        assert!(index.graph("missing").is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = NasBenchIndex::load(Path::new("/nonexistent/nasbench.json"));
        assert!(matches!(result, Err(InfoNasError::PathNotFound(_))));
    }
}
