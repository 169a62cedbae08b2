//! Sparse feature vectors.

use std::str::FromStr;
use std::sync::OnceLock;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};

/// How accumulated token weights are embedded into the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Embedding {
    /// Keep accumulated weights (token counts for unweighted reports).
    #[default]
    Count,
    /// Every present feature gets weight 1.
    Binary,
}

impl Embedding {
    /// Get the name of this embedding.
    pub fn name(&self) -> &'static str {
        match self {
            Embedding::Count => "count",
            Embedding::Binary => "binary",
        }
    }

    /// Parse an embedding from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "count" | "cnt" => Ok(Embedding::Count),
            "binary" | "bin" => Ok(Embedding::Binary),
            _ => Err(MalheurError::config(format!("Unknown embedding: {s}"))),
        }
    }
}

impl FromStr for Embedding {
    type Err = MalheurError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

/// Vector normalization applied after embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Leave weights untouched.
    #[default]
    None,
    /// Weights sum to one.
    L1,
    /// Unit Euclidean length.
    L2,
}

impl Normalization {
    /// Get the name of this normalization.
    pub fn name(&self) -> &'static str {
        match self {
            Normalization::None => "none",
            Normalization::L1 => "l1",
            Normalization::L2 => "l2",
        }
    }

    /// Parse a normalization from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Normalization::None),
            "l1" => Ok(Normalization::L1),
            "l2" => Ok(Normalization::L2),
            _ => Err(MalheurError::config(format!("Unknown normalization: {s}"))),
        }
    }
}

impl FromStr for Normalization {
    type Err = MalheurError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

/// A sparse feature vector: `(index, weight)` pairs sorted by index.
///
/// Indices are unique and weights are finite and strictly positive; zero
/// weights are never stored. The squared Euclidean norm is computed lazily
/// and cached until the next mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    entries: Vec<(u32, f64)>,
    #[serde(skip)]
    squared_norm: OnceLock<f64>,
}

impl PartialEq for FeatureVector {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FeatureVector {
    /// Create an empty (all-zero) vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vector from unordered `(index, weight)` pairs.
    ///
    /// Duplicate indices are summed and zero weights dropped.
    pub fn from_entries(mut entries: Vec<(u32, f64)>) -> Result<Self> {
        for &(index, weight) in &entries {
            validate_weight(index, weight)?;
        }

        entries.sort_by_key(|&(index, _)| index);
        let mut merged: Vec<(u32, f64)> = Vec::with_capacity(entries.len());
        for (index, weight) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == index => last.1 += weight,
                _ => merged.push((index, weight)),
            }
        }
        merged.retain(|&(_, weight)| weight > 0.0);

        Ok(Self {
            entries: merged,
            squared_norm: OnceLock::new(),
        })
    }

    /// The stored `(index, weight)` pairs, sorted by index.
    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    /// Number of non-zero dimensions.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Whether this is the zero vector.
    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight at `index` (zero when absent).
    pub fn get(&self, index: u32) -> f64 {
        self.entries
            .binary_search_by_key(&index, |&(i, _)| i)
            .map(|pos| self.entries[pos].1)
            .unwrap_or(0.0)
    }

    /// Largest stored index, if any.
    pub fn max_index(&self) -> Option<u32> {
        self.entries.last().map(|&(index, _)| index)
    }

    /// Accumulate `weight` at `index`.
    pub fn add(&mut self, index: u32, weight: f64) -> Result<()> {
        validate_weight(index, weight)?;
        if weight == 0.0 {
            return Ok(());
        }

        match self.entries.binary_search_by_key(&index, |&(i, _)| i) {
            Ok(pos) => self.entries[pos].1 += weight,
            Err(pos) => self.entries.insert(pos, (index, weight)),
        }
        self.invalidate();
        Ok(())
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    /// Sum of squared weights, cached after the first call. Equals
    /// `self.dot(self)` bit for bit.
    pub fn squared_norm(&self) -> f64 {
        *self
            .squared_norm
            .get_or_init(|| self.entries.iter().map(|(_, w)| w * w).sum())
    }

    /// Sum of weights (L1 norm; weights are non-negative).
    pub fn l1_norm(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    /// Inner product with another vector, by merge-join over the sorted indices.
    pub fn dot(&self, other: &FeatureVector) -> f64 {
        let (a, b) = (&self.entries, &other.entries);
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;

        while i < a.len() && j < b.len() {
            match a[i].0.cmp(&b[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += a[i].1 * b[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }

        sum
    }

    /// Apply an embedding to the stored weights.
    pub fn embed(&mut self, embedding: Embedding) {
        if embedding == Embedding::Binary {
            for (_, weight) in &mut self.entries {
                *weight = 1.0;
            }
            self.invalidate();
        }
    }

    /// Normalize in place. Zero vectors are left unchanged.
    pub fn normalize(&mut self, normalization: Normalization) {
        let denominator = match normalization {
            Normalization::None => return,
            Normalization::L1 => self.l1_norm(),
            Normalization::L2 => self.norm(),
        };
        if denominator > 0.0 {
            for (_, weight) in &mut self.entries {
                *weight /= denominator;
            }
            self.invalidate();
        }
    }

    /// Verify all indices fall inside an index space of `capacity` dimensions.
    pub fn check_capacity(&self, capacity: usize) -> Result<()> {
        match self.max_index() {
            Some(index) if index as u64 >= capacity as u64 => Err(MalheurError::data(format!(
                "feature index {index} exceeds index space of {capacity} dimensions"
            ))),
            _ => Ok(()),
        }
    }

    /// Whether indices are strictly increasing and weights finite and positive.
    pub fn is_well_formed(&self) -> bool {
        self.entries.windows(2).all(|pair| pair[0].0 < pair[1].0)
            && self
                .entries
                .iter()
                .all(|&(_, weight)| weight.is_finite() && weight > 0.0)
    }

    fn invalidate(&mut self) {
        self.squared_norm = OnceLock::new();
    }
}

fn validate_weight(index: u32, weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(MalheurError::data(format!(
            "invalid weight {weight} for feature {index}"
        )));
    }
    Ok(())
}

/// Accumulates hashed token weights before compacting into a [`FeatureVector`].
#[derive(Debug, Default)]
pub struct FeatureVectorBuilder {
    weights: AHashMap<u32, f64>,
}

impl FeatureVectorBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight` to feature `index`.
    pub fn add(&mut self, index: u32, weight: f64) -> Result<()> {
        validate_weight(index, weight)?;
        *self.weights.entry(index).or_insert(0.0) += weight;
        Ok(())
    }

    /// Sort and compact the accumulated weights.
    pub fn build(self) -> FeatureVector {
        let mut entries: Vec<(u32, f64)> = self
            .weights
            .into_iter()
            .filter(|&(_, weight)| weight > 0.0)
            .collect();
        entries.sort_unstable_by_key(|&(index, _)| index);

        FeatureVector {
            entries,
            squared_norm: OnceLock::new(),
        }
    }
}
