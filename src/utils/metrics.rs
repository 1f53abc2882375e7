//! Loss and embedding bookkeeping
//!
//! Per-epoch statistics are collected batch by batch for every model variant
//! and folded into run-lifetime structures when the epoch ends.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::HostTensor;

/// Which of the concurrently trained models a statistic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantTag {
    /// Graph autoencoder trained on unlabeled batches
    Primary,
    /// Autoencoder extended with the IO head, trained on labeled batches
    Labeled,
    /// Control copy of the initial primary model, never sees labels
    Reference,
}

impl VariantTag {
    /// Short name used in checkpoint file names
    pub fn file_stem(&self) -> &'static str {
        match self {
            VariantTag::Primary => "orig",
            VariantTag::Labeled => "labeled",
            VariantTag::Reference => "ref",
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantTag::Primary => write!(f, "primary"),
            VariantTag::Labeled => write!(f, "labeled"),
            VariantTag::Reference => write!(f, "reference"),
        }
    }
}

/// Loss category recorded by the batch evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossCategory {
    Total,
    Unlabeled,
    Labeled,
}

/// Ordered loss values per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub total: Vec<f64>,
    pub unlabeled: Vec<f64>,
    pub labeled: Vec<f64>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: LossCategory, value: f64) {
        self.values_mut(category).push(value);
    }

    pub fn values(&self, category: LossCategory) -> &[f64] {
        match category {
            LossCategory::Total => &self.total,
            LossCategory::Unlabeled => &self.unlabeled,
            LossCategory::Labeled => &self.labeled,
        }
    }

    fn values_mut(&mut self, category: LossCategory) -> &mut Vec<f64> {
        match category {
            LossCategory::Total => &mut self.total,
            LossCategory::Unlabeled => &mut self.unlabeled,
            LossCategory::Labeled => &mut self.labeled,
        }
    }

    /// Mean of every non-empty category
    pub fn means(&self) -> BTreeMap<LossCategory, f64> {
        [LossCategory::Total, LossCategory::Unlabeled, LossCategory::Labeled]
            .into_iter()
            .filter_map(|c| mean(self.values(c)).map(|m| (c, m)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_empty() && self.unlabeled.is_empty() && self.labeled.is_empty()
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Latent mean vectors collected during one epoch, one entry per batch
#[derive(Debug, Clone, Default)]
pub struct EmbeddingHistory {
    pub batches: Vec<HostTensor>,
}

impl EmbeddingHistory {
    pub fn push(&mut self, z: HostTensor) {
        self.batches.push(z);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Mean and standard deviation over every collected latent value
    pub fn summary(&self) -> Option<(f64, f64)> {
        let values: Vec<f64> = self
            .batches
            .iter()
            .flat_map(|b| b.values.iter().map(|v| *v as f64))
            .collect();
        let m = mean(&values)?;
        let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
        Some((m, var.sqrt()))
    }
}

/// Statistics of a single epoch, recreated at the start of every epoch
#[derive(Debug, Clone, Default)]
pub struct EpochStatistics {
    pub losses: BTreeMap<VariantTag, LossHistory>,
    pub embeddings: BTreeMap<VariantTag, EmbeddingHistory>,
}

impl EpochStatistics {
    /// Empty statistics for the active variants
    pub fn new(variants: &[VariantTag]) -> Self {
        Self {
            losses: variants.iter().map(|v| (*v, LossHistory::new())).collect(),
            embeddings: variants
                .iter()
                .map(|v| (*v, EmbeddingHistory::default()))
                .collect(),
        }
    }

    /// Loss history and embedding list of one variant, created on first use
    pub fn variant_mut(&mut self, tag: VariantTag) -> (&mut LossHistory, &mut EmbeddingHistory) {
        (
            self.losses.entry(tag).or_default(),
            self.embeddings.entry(tag).or_default(),
        )
    }

    pub fn losses(&self, tag: VariantTag) -> Option<&LossHistory> {
        self.losses.get(&tag)
    }
}

/// Loss history of a whole run: one epoch mean per category per variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLosses {
    pub variants: BTreeMap<VariantTag, LossHistory>,
}

impl RunLosses {
    /// Append the epoch means; categories that saw no batch stay untouched
    pub fn merge_epoch(&mut self, epoch: &EpochStatistics) {
        for (tag, history) in &epoch.losses {
            let run = self.variants.entry(*tag).or_default();
            for (category, value) in history.means() {
                run.record(category, value);
            }
        }
    }

    pub fn get(&self, tag: VariantTag) -> Option<&LossHistory> {
        self.variants.get(&tag)
    }
}

/// Named metric series per variant, one value per evaluated epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub variants: BTreeMap<VariantTag, BTreeMap<String, Vec<f64>>>,
}

/// Metrics produced by one end-of-epoch evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    pub values: BTreeMap<VariantTag, BTreeMap<String, f64>>,
}

impl EpochMetrics {
    pub fn insert(&mut self, tag: VariantTag, name: &str, value: f64) {
        self.values
            .entry(tag)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, tag: VariantTag, name: &str) -> Option<f64> {
        self.values.get(&tag).and_then(|m| m.get(name)).copied()
    }
}

impl RunMetrics {
    pub fn merge_epoch(&mut self, epoch: EpochMetrics) {
        for (tag, values) in epoch.values {
            let series = self.variants.entry(tag).or_default();
            for (name, value) in values {
                series.entry(name).or_default().push(value);
            }
        }
    }

    pub fn series(&self, tag: VariantTag, name: &str) -> Option<&[f64]> {
        self.variants
            .get(&tag)
            .and_then(|m| m.get(name))
            .map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_means_skip_empty_categories() {
        let mut history = LossHistory::new();
        history.record(LossCategory::Total, 2.0);
        history.record(LossCategory::Total, 4.0);
        history.record(LossCategory::Unlabeled, 1.0);

        let means = history.means();
        assert_eq!(means.get(&LossCategory::Total), Some(&3.0));
        assert_eq!(means.get(&LossCategory::Unlabeled), Some(&1.0));
        assert!(!means.contains_key(&LossCategory::Labeled));
    }

    #[test]
    fn test_run_losses_merge() {
        let mut epoch = EpochStatistics::new(&[VariantTag::Primary, VariantTag::Reference]);
        epoch.variant_mut(VariantTag::Primary).0.record(LossCategory::Total, 1.5);
        epoch.variant_mut(VariantTag::Primary).0.record(LossCategory::Total, 0.5);

        let mut run = RunLosses::default();
        run.merge_epoch(&epoch);
        run.merge_epoch(&epoch);

        let primary = run.get(VariantTag::Primary).unwrap();
        assert_eq!(primary.total, vec![1.0, 1.0]);
        assert!(run.get(VariantTag::Reference).unwrap().is_empty());
    }

    #[test]
    fn test_run_metrics_series() {
        let mut run = RunMetrics::default();
        for value in [0.1, 0.2] {
            let mut m = EpochMetrics::default();
            m.insert(VariantTag::Labeled, "valid_io_loss", value);
            run.merge_epoch(m);
        }
        assert_eq!(run.series(VariantTag::Labeled, "valid_io_loss"), Some(&[0.1, 0.2][..]));
        assert!(run.series(VariantTag::Primary, "valid_io_loss").is_none());
    }

    #[test]
    fn test_embedding_summary() {
        let mut z = EmbeddingHistory::default();
        assert!(z.summary().is_none());
        z.push(HostTensor::new(vec![2], vec![1.0, 3.0]).unwrap());
        let (m, s) = z.summary().unwrap();
        assert!((m - 2.0).abs() < 1e-9);
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_variant_file_stems() {
        assert_eq!(VariantTag::Primary.file_stem(), "orig");
        assert_eq!(VariantTag::Labeled.file_stem(), "labeled");
        assert_eq!(VariantTag::Reference.file_stem(), "ref");
        assert_eq!(VariantTag::Reference.to_string(), "reference");
    }
}
