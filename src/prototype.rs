//! Prototype extraction.
//!
//! Reduces a collection to a small set of representative vectors such that
//! every vector is at least `threshold`-similar to the prototype covering it.
//! Vectors are visited in collection order; a vector joins the most similar
//! existing prototype (earliest one on ties) if that similarity reaches the
//! threshold, and becomes a new prototype otherwise.
//!
//! The result depends on the visiting order, but the coverage guarantee does
//! not. Re-running the extraction on the prototypes alone returns them all
//! unchanged.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};
use crate::feature::collection::FeatureVectorCollection;
use crate::feature::vector::FeatureVector;
use crate::similarity::engine::SimilarityEngine;

/// Greedy single-pass prototype extractor.
#[derive(Debug, Clone, Copy)]
pub struct PrototypeExtractor {
    engine: SimilarityEngine,
    threshold: f64,
}

impl PrototypeExtractor {
    /// Create an extractor; fails if `threshold` is unattainable for the kernel.
    pub fn new(engine: SimilarityEngine, threshold: f64) -> Result<Self> {
        engine.kernel().validate_threshold(threshold)?;
        Ok(Self { engine, threshold })
    }

    /// Minimum similarity between a vector and its prototype.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The similarity engine used for coverage decisions.
    pub fn engine(&self) -> &SimilarityEngine {
        &self.engine
    }

    /// Extract prototypes from a collection. An empty collection yields an
    /// empty prototype set.
    pub fn extract(&self, collection: &FeatureVectorCollection) -> Result<PrototypeSet> {
        let n = collection.len();
        let vectors = collection.vectors();

        let mut prototypes: Vec<usize> = Vec::new();
        let mut prototype_vectors: Vec<&FeatureVector> = Vec::new();
        let mut assignments = Vec::with_capacity(n);
        let mut similarities = Vec::with_capacity(n);

        for (i, vector) in vectors.iter().enumerate() {
            let scores = self.engine.similarities(vector, &prototype_vectors);

            // Strict comparison keeps the earliest prototype on ties.
            let mut best: Option<(usize, f64)> = None;
            for (p, &score) in scores.iter().enumerate() {
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((p, score));
                }
            }

            match best {
                Some((p, score)) if score >= self.threshold => {
                    assignments.push(p);
                    similarities.push(score);
                }
                _ => {
                    assignments.push(prototypes.len());
                    similarities.push(self.engine.similarity(vector, vector));
                    prototypes.push(i);
                    prototype_vectors.push(vector);
                }
            }
        }

        info!(
            "Extracted {} prototypes from {} reports (threshold {}, {} kernel)",
            prototypes.len(),
            n,
            self.threshold,
            self.engine.kernel().name()
        );

        let set = PrototypeSet {
            threshold: self.threshold,
            prototypes,
            assignments,
            similarities,
        };
        debug!("Prototype coverage sizes: {:?}", set.coverage_sizes());
        Ok(set)
    }
}

/// Prototypes of a collection and the coverage of every original vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrototypeSet {
    threshold: f64,
    prototypes: Vec<usize>,
    assignments: Vec<usize>,
    similarities: Vec<f64>,
}

impl PrototypeSet {
    /// Threshold the set was extracted with.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of prototypes.
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Whether there are no prototypes (empty input).
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Collection indices of the prototypes, in creation order.
    pub fn prototypes(&self) -> &[usize] {
        &self.prototypes
    }

    /// For every original vector, the position of its prototype in [`Self::prototypes`].
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    /// For every original vector, its similarity to the covering prototype.
    pub fn similarities(&self) -> &[f64] {
        &self.similarities
    }

    /// Collection index of the prototype covering vector `index`.
    pub fn prototype_of(&self, index: usize) -> Option<usize> {
        self.assignments
            .get(index)
            .and_then(|&position| self.prototypes.get(position).copied())
    }

    /// Whether vector `index` is itself a prototype.
    pub fn is_prototype(&self, index: usize) -> bool {
        self.prototype_of(index) == Some(index)
    }

    /// Collection indices covered by the prototype at `position`.
    pub fn members(&self, position: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == position)
            .map(|(index, _)| index)
            .collect()
    }

    /// Number of vectors covered by each prototype.
    pub fn coverage_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.prototypes.len()];
        for &p in &self.assignments {
            sizes[p] += 1;
        }
        sizes
    }

    /// Copy the prototype vectors, with metadata, out of their source collection.
    pub fn to_collection(&self, source: &FeatureVectorCollection) -> Result<FeatureVectorCollection> {
        if source.len() != self.assignments.len() {
            return Err(MalheurError::invalid_operation(format!(
                "prototype set covers {} vectors but collection has {}",
                self.assignments.len(),
                source.len()
            )));
        }
        source.subset(&self.prototypes)
    }
}
