//! Hierarchical agglomerative clustering over a similarity matrix.
//!
//! Every vector starts as its own cluster. Each step merges the pair of
//! clusters with the highest linkage similarity; ties go to the pair with
//! the lowest `(lower slot, higher slot)` indices, where a cluster's slot is
//! its smallest member index. Each active slot caches its nearest neighbour
//! so a step only rescans the rows whose neighbour was merged away.

use bit_vec::BitVec;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::dendrogram::{Dendrogram, MONOTONICITY_TOLERANCE, Merge, Partition};
use crate::cluster::linkage::Linkage;
use crate::error::{MalheurError, Result};
use crate::similarity::matrix::SimilarityMatrix;

/// Minimum number of rows to rescan before the rescan runs in parallel.
const PARALLEL_REFRESH_CUTOFF: usize = 64;

/// What a clustering run hands back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ClusterMode {
    /// Flat partition at a similarity threshold.
    Cut { threshold: f64 },
    /// Merge sequence only.
    Dendrogram,
}

impl ClusterMode {
    /// Get the name of this mode.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterMode::Cut { .. } => "cut",
            ClusterMode::Dendrogram => "dendrogram",
        }
    }

    /// Parse a mode name; `threshold` is used by the cut mode.
    pub fn parse_str(s: &str, threshold: f64) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cut" => Ok(ClusterMode::Cut { threshold }),
            "dendrogram" | "tree" => Ok(ClusterMode::Dendrogram),
            _ => Err(MalheurError::config(format!("Unknown cluster mode: {s}"))),
        }
    }
}

/// Result of a clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub dendrogram: Dendrogram,
    /// Present in cut mode.
    pub partition: Option<Partition>,
}

/// Agglomerative clustering with a configurable linkage rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterEngine {
    linkage: Linkage,
    min_similarity: Option<f64>,
    parallel: bool,
}

impl ClusterEngine {
    pub fn new(linkage: Linkage) -> Self {
        Self {
            linkage,
            min_similarity: None,
            parallel: true,
        }
    }

    /// Stop merging once the best pair falls below `min_similarity`.
    pub fn with_min_similarity(mut self, min_similarity: Option<f64>) -> Result<Self> {
        if let Some(min) = min_similarity {
            if !min.is_finite() {
                return Err(MalheurError::config(format!(
                    "Minimum similarity must be finite, got {min}"
                )));
            }
        }
        self.min_similarity = min_similarity;
        Ok(self)
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn min_similarity(&self) -> Option<f64> {
        self.min_similarity
    }

    /// Cluster `matrix` and produce the output requested by `mode`.
    ///
    /// A cut threshold outside the matrix's value range is a config error.
    pub fn cluster(
        &self,
        matrix: &SimilarityMatrix,
        mode: ClusterMode,
        min_cluster_size: usize,
    ) -> Result<ClusterResult> {
        if min_cluster_size == 0 {
            return Err(MalheurError::config("Minimum cluster size must be at least 1"));
        }
        validate_matrix(matrix)?;
        if let ClusterMode::Cut { threshold } = mode {
            check_cut_threshold(matrix, threshold)?;
        }

        let dendrogram = self.dendrogram(matrix)?;
        let partition = match mode {
            ClusterMode::Cut { threshold } => {
                let partition = dendrogram.cut(threshold, min_cluster_size);
                info!(
                    "Cut at {threshold}: {} clusters, {} rejected",
                    partition.num_clusters(),
                    partition.rejected().len()
                );
                Some(partition)
            }
            ClusterMode::Dendrogram => None,
        };

        Ok(ClusterResult {
            dendrogram,
            partition,
        })
    }

    /// Run the merge loop and return the merge sequence.
    pub fn dendrogram(&self, matrix: &SimilarityMatrix) -> Result<Dendrogram> {
        validate_matrix(matrix)?;
        let n = matrix.rows();
        let mut state = Agglomeration::new(matrix)?;
        let mut neighbors: Vec<Option<(f64, usize)>> = if self.parallel && n >= PARALLEL_REFRESH_CUTOFF {
            (0..n).into_par_iter().map(|i| state.nearest(i)).collect()
        } else {
            (0..n).map(|i| state.nearest(i)).collect()
        };

        let mut dendrogram = Dendrogram::new(n);
        let mut previous: Option<f64> = None;

        while let Some((similarity, a, b)) = best_pair(&neighbors) {
            if self.min_similarity.is_some_and(|min| similarity < min) {
                debug!(
                    "Stopping at similarity {similarity} below minimum after {} merges",
                    dendrogram.merges().len()
                );
                break;
            }

            let step = dendrogram.merges().len();
            let similarity = monotone(previous, similarity, step)?;
            previous = Some(similarity);

            dendrogram.push(Merge {
                left: state.node[a],
                right: state.node[b],
                similarity,
                size: state.size[a] + state.size[b],
            });
            state.merge(a, b, self.linkage, n + step);
            neighbors[b] = None;

            let mut stale = vec![a];
            for k in (0..n).filter(|&k| k != a && state.active[k]) {
                match neighbors[k] {
                    Some((_, j)) if j == a || j == b => stale.push(k),
                    Some((top, j)) => {
                        let value = state.get(k, a);
                        if value > top || (value == top && a < j) {
                            neighbors[k] = Some((value, a));
                        }
                    }
                    None => stale.push(k),
                }
            }

            let refreshed: Vec<(usize, Option<(f64, usize)>)> =
                if self.parallel && stale.len() >= PARALLEL_REFRESH_CUTOFF {
                    stale.par_iter().map(|&k| (k, state.nearest(k))).collect()
                } else {
                    stale.iter().map(|&k| (k, state.nearest(k))).collect()
                };
            for (k, nearest) in refreshed {
                neighbors[k] = nearest;
            }
        }

        info!(
            "Clustered {n} vectors with {} linkage in {} merges",
            self.linkage.name(),
            dendrogram.merges().len()
        );
        Ok(dendrogram)
    }
}

/// Working copy of the similarity matrix plus per-slot cluster state.
struct Agglomeration {
    n: usize,
    sim: Vec<f64>,
    active: BitVec,
    size: Vec<usize>,
    node: Vec<usize>,
}

impl Agglomeration {
    fn new(matrix: &SimilarityMatrix) -> Result<Self> {
        let n = matrix.rows();
        let values = matrix.as_slice();
        let mut sim = Vec::new();
        sim.try_reserve_exact(values.len()).map_err(|_| {
            MalheurError::resource(
                "cluster working matrix",
                values.len() as u128 * std::mem::size_of::<f64>() as u128,
            )
        })?;
        sim.extend_from_slice(values);

        Ok(Self {
            n,
            sim,
            active: BitVec::from_elem(n, true),
            size: vec![1; n],
            node: (0..n).collect(),
        })
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.sim[i * self.n + j]
    }

    /// Most similar other active slot, lowest index on ties.
    fn nearest(&self, i: usize) -> Option<(f64, usize)> {
        let row = &self.sim[i * self.n..(i + 1) * self.n];
        let mut best: Option<(f64, usize)> = None;
        for (j, &value) in row.iter().enumerate() {
            if j == i || !self.active[j] {
                continue;
            }
            if best.is_none_or(|(top, _)| value > top) {
                best = Some((value, j));
            }
        }
        best
    }

    /// Merge slot `b` into slot `a` (`a < b`).
    fn merge(&mut self, a: usize, b: usize, linkage: Linkage, node: usize) {
        let (size_a, size_b) = (self.size[a], self.size[b]);
        for k in 0..self.n {
            if k == a || k == b || !self.active[k] {
                continue;
            }
            let value = linkage.update(self.get(a, k), self.get(b, k), size_a, size_b);
            self.sim[a * self.n + k] = value;
            self.sim[k * self.n + a] = value;
        }
        self.active.set(b, false);
        self.size[a] = size_a + size_b;
        self.node[a] = node;
    }
}

/// Highest cached similarity; ties go to the lexicographically lowest pair.
fn best_pair(neighbors: &[Option<(f64, usize)>]) -> Option<(f64, usize, usize)> {
    let mut best: Option<(f64, usize, usize)> = None;
    for (i, neighbor) in neighbors.iter().enumerate() {
        let Some((value, j)) = *neighbor else {
            continue;
        };
        let (lo, hi) = (i.min(j), i.max(j));
        let better = match best {
            None => true,
            Some((top, best_lo, best_hi)) => {
                value > top || (value == top && (lo, hi) < (best_lo, best_hi))
            }
        };
        if better {
            best = Some((value, lo, hi));
        }
    }
    best
}

/// Enforce non-increasing merge similarities, absorbing rounding noise.
fn monotone(previous: Option<f64>, similarity: f64, step: usize) -> Result<f64> {
    match previous {
        Some(prev) if similarity > prev => {
            if similarity - prev <= MONOTONICITY_TOLERANCE * prev.abs().max(1.0) {
                Ok(prev)
            } else {
                Err(MalheurError::data(format!(
                    "merge {step} similarity {similarity} exceeds previous merge similarity {prev}"
                )))
            }
        }
        _ => Ok(similarity),
    }
}

fn validate_matrix(matrix: &SimilarityMatrix) -> Result<()> {
    if matrix.rows() == 0 {
        return Err(MalheurError::data("Cannot cluster an empty collection"));
    }
    if !matrix.is_square() {
        return Err(MalheurError::data(format!(
            "Similarity matrix must be square, got {}x{}",
            matrix.rows(),
            matrix.cols()
        )));
    }
    if !matrix.is_finite() {
        return Err(MalheurError::data("Similarity matrix contains non-finite values"));
    }
    if !matrix.is_symmetric() {
        return Err(MalheurError::data("Similarity matrix is not symmetric"));
    }
    Ok(())
}

fn check_cut_threshold(matrix: &SimilarityMatrix, threshold: f64) -> Result<()> {
    if threshold.is_nan() {
        return Err(MalheurError::config("Cut threshold must be a number"));
    }
    // A single vector has no pairs to compare the threshold against.
    if matrix.rows() < 2 {
        return Ok(());
    }
    if let Some((lo, hi)) = matrix.value_range() {
        if threshold < lo || threshold > hi {
            return Err(MalheurError::config(format!(
                "Cut threshold {threshold} outside similarity range [{lo}, {hi}]"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n: usize, values: &[f64]) -> SimilarityMatrix {
        SimilarityMatrix::from_vec(n, n, values.to_vec()).unwrap()
    }

    fn chain() -> SimilarityMatrix {
        matrix(
            4,
            &[
                1.0, 0.9, 0.1, 0.0, //
                0.9, 1.0, 0.5, 0.2, //
                0.1, 0.5, 1.0, 0.8, //
                0.0, 0.2, 0.8, 1.0,
            ],
        )
    }

    #[test]
    fn test_single_linkage_merges() {
        let dendrogram = ClusterEngine::new(Linkage::Single).dendrogram(&chain()).unwrap();
        let merges = dendrogram.merges();
        assert_eq!(merges.len(), 3);
        assert_eq!((merges[0].left, merges[0].right, merges[0].similarity), (0, 1, 0.9));
        assert_eq!((merges[1].left, merges[1].right, merges[1].similarity), (2, 3, 0.8));
        assert_eq!((merges[2].left, merges[2].right, merges[2].similarity), (4, 5, 0.5));
        assert_eq!(merges[2].size, 4);
        dendrogram.validate().unwrap();
    }

    #[test]
    fn test_complete_and_average_linkage() {
        let complete = ClusterEngine::new(Linkage::Complete).dendrogram(&chain()).unwrap();
        assert_eq!(complete.merges()[2].similarity, 0.0);

        let average = ClusterEngine::new(Linkage::Average).dendrogram(&chain()).unwrap();
        let expected = (0.1 + 0.0 + 0.5 + 0.2) / 4.0;
        assert!((average.merges()[2].similarity - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_on_lowest_pair() {
        let tied = matrix(
            4,
            &[
                1.0, 0.5, 0.5, 0.5, //
                0.5, 1.0, 0.5, 0.5, //
                0.5, 0.5, 1.0, 0.5, //
                0.5, 0.5, 0.5, 1.0,
            ],
        );
        let dendrogram = ClusterEngine::new(Linkage::Average).dendrogram(&tied).unwrap();
        let pairs: Vec<(usize, usize)> =
            dendrogram.merges().iter().map(|m| (m.left, m.right)).collect();
        assert_eq!(pairs, vec![(0, 1), (4, 2), (5, 3)]);
    }

    #[test]
    fn test_cut_partition() {
        let engine = ClusterEngine::new(Linkage::Complete);
        let result = engine.cluster(&chain(), ClusterMode::Cut { threshold: 0.7 }, 1).unwrap();
        let partition = result.partition.unwrap();
        assert_eq!(partition.assignments(), &[Some(0), Some(0), Some(1), Some(1)]);

        let result = engine.cluster(&chain(), ClusterMode::Dendrogram, 1).unwrap();
        assert!(result.partition.is_none());
        assert_eq!(result.dendrogram.merges().len(), 3);
    }

    #[test]
    fn test_min_similarity_stops_early() {
        let engine = ClusterEngine::new(Linkage::Single)
            .with_min_similarity(Some(0.6))
            .unwrap();
        let dendrogram = engine.dendrogram(&chain()).unwrap();
        assert_eq!(dendrogram.merges().len(), 2);
        assert!(!dendrogram.is_complete());
    }

    #[test]
    fn test_invalid_inputs() {
        let engine = ClusterEngine::new(Linkage::Single);
        let error = engine
            .cluster(&chain(), ClusterMode::Cut { threshold: 1.5 }, 1)
            .unwrap_err();
        assert!(error.is_config());
        assert!(engine.cluster(&chain(), ClusterMode::Dendrogram, 0).unwrap_err().is_config());

        let empty = SimilarityMatrix::zeros(0, 0).unwrap();
        assert!(engine.dendrogram(&empty).unwrap_err().is_data());

        let skewed = matrix(2, &[1.0, 0.2, 0.3, 1.0]);
        assert!(engine.dendrogram(&skewed).unwrap_err().is_data());

        let nan = matrix(2, &[1.0, f64::NAN, f64::NAN, 1.0]);
        assert!(engine.dendrogram(&nan).unwrap_err().is_data());

        assert!(engine.with_min_similarity(Some(f64::NAN)).unwrap_err().is_config());
        assert!(ClusterMode::parse_str("ward", 0.5).unwrap_err().is_config());
    }

    #[test]
    fn test_single_vector() {
        let result = ClusterEngine::new(Linkage::Complete)
            .cluster(&matrix(1, &[1.0]), ClusterMode::Cut { threshold: 0.95 }, 1)
            .unwrap();
        assert!(result.dendrogram.merges().is_empty());
        assert_eq!(result.partition.unwrap().num_clusters(), 1);
    }

    #[test]
    fn test_monotone_clamps_noise_and_rejects_increase() {
        assert_eq!(monotone(Some(0.5), 0.5 + 1e-12, 1).unwrap(), 0.5);
        assert_eq!(monotone(Some(0.5), 0.4, 1).unwrap(), 0.4);
        assert!(monotone(Some(0.5), 0.6, 1).unwrap_err().is_data());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 90;
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let (a, b) = (i.min(j), i.max(j));
                values[i * n + j] = if i == j {
                    1.0
                } else {
                    ((a * 31 + b * 17) % 23) as f64 / 23.0
                };
            }
        }
        let m = matrix(n, &values);
        for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average] {
            let parallel = ClusterEngine::new(linkage).dendrogram(&m).unwrap();
            let sequential = ClusterEngine::new(linkage)
                .with_parallel(false)
                .dendrogram(&m)
                .unwrap();
            assert_eq!(parallel, sequential);
            parallel.validate().unwrap();
        }
    }
}
