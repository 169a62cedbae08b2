//! Ordered collections of feature vectors with per-report metadata.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::error::{MalheurError, Result};
use crate::feature::hasher::FeatureHasher;
use crate::feature::vector::{FeatureVector, FeatureVectorBuilder};

/// Minimum number of reports before vectorization is spread over threads.
const PARALLEL_BUILD_CUTOFF: usize = 32;

/// One behavioral token of a report, optionally weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    /// A token with implicit weight 1.
    Plain(String),
    /// A token with an explicit weight.
    Weighted {
        /// Token text.
        text: String,
        /// Non-negative weight added to the token's feature.
        weight: f64,
    },
}

impl Token {
    /// Token text.
    pub fn text(&self) -> &str {
        match self {
            Token::Plain(text) => text,
            Token::Weighted { text, .. } => text,
        }
    }

    /// Token weight.
    pub fn weight(&self) -> f64 {
        match self {
            Token::Plain(_) => 1.0,
            Token::Weighted { weight, .. } => *weight,
        }
    }
}

impl From<&str> for Token {
    fn from(text: &str) -> Self {
        Token::Plain(text.to_string())
    }
}

impl From<String> for Token {
    fn from(text: String) -> Self {
        Token::Plain(text)
    }
}

/// A report as produced by ingestion: identifier, label and token sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    /// Original identifier, e.g. a file name.
    pub source: String,
    /// Optional class label (malware family).
    #[serde(default)]
    pub label: String,
    /// Behavioral tokens in report order.
    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl RawReport {
    /// Create a report from anything convertible to tokens.
    pub fn new<S, L, I, T>(source: S, label: L, tokens: I) -> Self
    where
        S: Into<String>,
        L: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        Self {
            source: source.into(),
            label: label.into(),
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered feature vectors plus parallel label and source arrays.
///
/// Insertion order is the canonical index used by every matrix, prototype
/// assignment and cluster partition derived from the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVectorCollection {
    vectors: Vec<FeatureVector>,
    labels: Vec<String>,
    sources: Vec<String>,
}

impl FeatureVectorCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collection with room for `capacity` vectors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vectors: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
            sources: Vec::with_capacity(capacity),
        }
    }

    /// Vectorize reports, preserving their order.
    pub fn from_reports(
        reports: &[RawReport],
        hasher: &FeatureHasher,
        config: &FeatureConfig,
    ) -> Result<Self> {
        // Slot claims in a lookup table depend on registration order, so
        // table-backed builds stay sequential.
        let vectors = if !hasher.has_table() && reports.len() >= PARALLEL_BUILD_CUTOFF {
            reports
                .par_iter()
                .map(|report| vectorize(report, hasher, config))
                .collect::<Result<Vec<_>>>()?
        } else {
            reports
                .iter()
                .map(|report| vectorize(report, hasher, config))
                .collect::<Result<Vec<_>>>()?
        };

        let mut collection = Self::with_capacity(reports.len());
        for (vector, report) in vectors.into_iter().zip(reports) {
            collection.push(vector, report.label.clone(), report.source.clone());
        }

        debug!(
            "Built {} feature vectors ({} non-zero entries)",
            collection.len(),
            collection.total_nnz()
        );
        Ok(collection)
    }

    /// Append a vector with its metadata.
    pub fn push<L: Into<String>, S: Into<String>>(
        &mut self,
        vector: FeatureVector,
        label: L,
        source: S,
    ) {
        self.vectors.push(vector);
        self.labels.push(label.into());
        self.sources.push(source.into());
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the collection holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Vector at `index`.
    pub fn vector(&self, index: usize) -> Option<&FeatureVector> {
        self.vectors.get(index)
    }

    /// Label at `index`.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Source identifier at `index`.
    pub fn source(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(String::as_str)
    }

    /// All vectors in order.
    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    /// All labels in order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// All source identifiers in order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Iterate over `(vector, label, source)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureVector, &str, &str)> {
        self.vectors
            .iter()
            .zip(&self.labels)
            .zip(&self.sources)
            .map(|((vector, label), source)| (vector, label.as_str(), source.as_str()))
    }

    /// Copy the given entries, in the given order, into a new collection.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let mut subset = Self::with_capacity(indices.len());
        for &index in indices {
            let vector = self.vectors.get(index).ok_or_else(|| {
                MalheurError::invalid_operation(format!(
                    "index {index} out of range for collection of {}",
                    self.len()
                ))
            })?;
            subset.push(
                vector.clone(),
                self.labels[index].clone(),
                self.sources[index].clone(),
            );
        }
        Ok(subset)
    }

    /// Total number of non-zero entries over all vectors.
    pub fn total_nnz(&self) -> usize {
        self.vectors.iter().map(FeatureVector::nnz).sum()
    }

    /// Check the parallel-array invariant and index bounds.
    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.labels.len() != self.vectors.len() || self.sources.len() != self.vectors.len() {
            return Err(MalheurError::data(format!(
                "collection metadata out of sync: {} vectors, {} labels, {} sources",
                self.vectors.len(),
                self.labels.len(),
                self.sources.len()
            )));
        }
        for vector in &self.vectors {
            vector.check_capacity(capacity)?;
        }
        Ok(())
    }
}

fn vectorize(
    report: &RawReport,
    hasher: &FeatureHasher,
    config: &FeatureConfig,
) -> Result<FeatureVector> {
    let mut builder = FeatureVectorBuilder::new();
    for token in &report.tokens {
        builder.add(hasher.index(token.text()), token.weight())?;
    }

    let mut vector = builder.build();
    vector.embed(config.embedding);
    vector.normalize(config.normalization);
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::vector::{Embedding, Normalization};

    fn reports() -> Vec<RawReport> {
        vec![
            RawReport::new("r1.bin", "worm", ["a", "b", "a"]),
            RawReport::new("r2.bin", "worm", ["a"]),
            RawReport::new("r3.bin", "trojan", Vec::<&str>::new()),
        ]
    }

    #[test]
    fn test_from_reports_preserves_order_and_metadata() {
        let hasher = FeatureHasher::new(1 << 16).unwrap();
        let collection =
            FeatureVectorCollection::from_reports(&reports(), &hasher, &FeatureConfig::default())
                .unwrap();

        assert_eq!(collection.len(), 3);
        assert_eq!(collection.sources(), &["r1.bin", "r2.bin", "r3.bin"]);
        assert_eq!(collection.label(2), Some("trojan"));

        let a = hasher.index("a");
        assert_eq!(collection.vector(0).unwrap().get(a), 2.0);
        assert_eq!(collection.vector(1).unwrap().get(a), 1.0);
        assert!(collection.vector(2).unwrap().is_zero());
        collection.validate(hasher.capacity()).unwrap();
    }

    #[test]
    fn test_weighted_tokens_and_embedding() {
        let report = RawReport {
            source: "r".into(),
            label: String::new(),
            tokens: vec![
                Token::Weighted {
                    text: "x".into(),
                    weight: 2.5,
                },
                Token::from("x"),
            ],
        };
        let hasher = FeatureHasher::new(64).unwrap();

        let config = FeatureConfig::default();
        let counted = FeatureVectorCollection::from_reports(
            std::slice::from_ref(&report),
            &hasher,
            &config,
        )
        .unwrap();
        assert_eq!(counted.vector(0).unwrap().l1_norm(), 3.5);

        let config = FeatureConfig {
            embedding: Embedding::Binary,
            normalization: Normalization::L2,
            ..FeatureConfig::default()
        };
        let binary = FeatureVectorCollection::from_reports(&[report], &hasher, &config).unwrap();
        assert_eq!(binary.vector(0).unwrap().entries().len(), 1);
        assert_eq!(binary.vector(0).unwrap().norm(), 1.0);
    }

    #[test]
    fn test_parallel_build_matches_sequential() {
        let reports: Vec<RawReport> = (0..100)
            .map(|i| {
                let tokens: Vec<String> = (0..i % 7).map(|j| format!("tok{}", (i + j) % 11)).collect();
                RawReport::new(format!("r{i}"), "", tokens)
            })
            .collect();

        let stateless = FeatureHasher::new(1 << 12).unwrap();
        let parallel =
            FeatureVectorCollection::from_reports(&reports, &stateless, &FeatureConfig::default())
                .unwrap();

        let sequential: Vec<FeatureVector> = reports
            .iter()
            .map(|r| vectorize(r, &stateless, &FeatureConfig::default()).unwrap())
            .collect();
        assert_eq!(parallel.vectors(), sequential.as_slice());
    }

    #[test]
    fn test_subset() {
        let hasher = FeatureHasher::new(128).unwrap();
        let collection =
            FeatureVectorCollection::from_reports(&reports(), &hasher, &FeatureConfig::default())
                .unwrap();

        let subset = collection.subset(&[2, 0]).unwrap();
        assert_eq!(subset.sources(), &["r3.bin", "r1.bin"]);
        assert!(collection.subset(&[3]).is_err());
    }
}
