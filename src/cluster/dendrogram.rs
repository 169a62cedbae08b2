//! Merge trees and flat partitions.

use std::hash::Hash;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};

/// Relative tolerance for floating-point noise in merge similarities.
pub(crate) const MONOTONICITY_TOLERANCE: f64 = 1e-9;

/// One agglomeration step.
///
/// Node ids `0..leaves` are the original vectors; the `k`-th merge creates
/// node `leaves + k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    /// Node id of the first child (the one with the lower working slot).
    pub left: usize,
    /// Node id of the second child.
    pub right: usize,
    /// Inter-cluster similarity at merge time.
    pub similarity: f64,
    /// Number of leaves below the new node.
    pub size: usize,
}

/// The merge sequence of an agglomerative clustering run.
///
/// Merge similarities never increase from one merge to the next. A run that
/// stopped early at a minimum similarity leaves a forest rather than a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    leaves: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub(crate) fn new(leaves: usize) -> Self {
        Self {
            leaves,
            merges: Vec::with_capacity(leaves.saturating_sub(1)),
        }
    }

    /// Build a dendrogram from an externally produced merge list.
    pub fn from_merges(leaves: usize, merges: Vec<Merge>) -> Result<Self> {
        let dendrogram = Self { leaves, merges };
        dendrogram.validate()?;
        Ok(dendrogram)
    }

    pub(crate) fn push(&mut self, merge: Merge) {
        self.merges.push(merge);
    }

    /// Number of original vectors.
    pub fn leaves(&self) -> usize {
        self.leaves
    }

    /// Merges in the order they happened.
    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Whether everything was merged into a single root.
    pub fn is_complete(&self) -> bool {
        self.merges.len() + 1 >= self.leaves
    }

    /// Check node references, leaf counts and monotonicity of merge similarities.
    pub fn validate(&self) -> Result<()> {
        let total_nodes = self.leaves + self.merges.len();
        let mut used = vec![false; total_nodes];
        let mut sizes: Vec<usize> = vec![1; self.leaves];
        let mut previous: Option<f64> = None;

        for (k, merge) in self.merges.iter().enumerate() {
            let node = self.leaves + k;
            for child in [merge.left, merge.right] {
                if child >= node || used[child] {
                    return Err(MalheurError::data(format!(
                        "merge {k} references invalid or already merged node {child}"
                    )));
                }
                used[child] = true;
            }
            if merge.left == merge.right {
                return Err(MalheurError::data(format!("merge {k} joins node {} with itself", merge.left)));
            }

            let size = sizes[merge.left] + sizes[merge.right];
            if size != merge.size {
                return Err(MalheurError::data(format!(
                    "merge {k} records size {} but joins {size} leaves",
                    merge.size
                )));
            }
            sizes.push(size);

            if !merge.similarity.is_finite() {
                return Err(MalheurError::data(format!("merge {k} has non-finite similarity")));
            }
            if let Some(prev) = previous {
                if merge.similarity > prev {
                    return Err(MalheurError::data(format!(
                        "merge {k} similarity {} exceeds previous merge similarity {prev}",
                        merge.similarity
                    )));
                }
            }
            previous = Some(merge.similarity);
        }

        Ok(())
    }

    /// Flat clustering that applies every merge with similarity ≥ `threshold`.
    ///
    /// Clusters with fewer than `min_cluster_size` members are rejected.
    pub fn cut(&self, threshold: f64, min_cluster_size: usize) -> Partition {
        let mut parent: Vec<usize> = (0..self.leaves).collect();
        let mut representative: Vec<usize> = (0..self.leaves).collect();

        for merge in self.merges.iter().take_while(|m| m.similarity >= threshold) {
            let left = find(&mut parent, representative[merge.left]);
            let right = find(&mut parent, representative[merge.right]);
            let root = left.min(right);
            parent[left.max(right)] = root;
            representative.push(root);
        }

        let roots: Vec<usize> = (0..self.leaves).map(|i| find(&mut parent, i)).collect();
        Partition::from_labels(&roots, min_cluster_size)
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

/// A flat clustering of a collection.
///
/// Cluster ids are dense and numbered in order of each cluster's first
/// member. Rejected vectors belong to no cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    assignments: Vec<Option<usize>>,
    clusters: Vec<Vec<usize>>,
}

impl Partition {
    /// Build a partition from arbitrary group labels, one per vector.
    pub fn from_labels<L: Eq + Hash + Copy>(labels: &[L], min_cluster_size: usize) -> Self {
        let labels: Vec<Option<L>> = labels.iter().copied().map(Some).collect();
        Self::group(&labels, min_cluster_size)
    }

    /// Lift a partition of owner vectors (e.g. prototypes) onto the vectors
    /// they own. `owners[i]` is the index of the owner of vector `i` in this
    /// partition. Vectors whose owner was rejected stay rejected.
    pub fn propagate(&self, owners: &[usize], min_cluster_size: usize) -> Self {
        let labels: Vec<Option<usize>> = owners.iter().map(|&owner| self.cluster_of(owner)).collect();
        Self::group(&labels, min_cluster_size)
    }

    fn group<L: Eq + Hash + Copy>(labels: &[Option<L>], min_cluster_size: usize) -> Self {
        let mut group_ids: AHashMap<L, usize> = AHashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of = Vec::with_capacity(labels.len());

        for (index, label) in labels.iter().enumerate() {
            let Some(label) = label else {
                group_of.push(None);
                continue;
            };
            let group = *group_ids.entry(*label).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(index);
            group_of.push(Some(group));
        }

        let mut cluster_of_group = vec![None; groups.len()];
        let mut clusters = Vec::new();
        for (group, members) in groups.into_iter().enumerate() {
            if members.len() >= min_cluster_size {
                cluster_of_group[group] = Some(clusters.len());
                clusters.push(members);
            }
        }

        Self {
            assignments: group_of
                .into_iter()
                .map(|group| group.and_then(|g| cluster_of_group[g]))
                .collect(),
            clusters,
        }
    }

    /// Number of (non-rejected) clusters.
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Cluster id per vector, `None` for rejected vectors.
    pub fn assignments(&self) -> &[Option<usize>] {
        &self.assignments
    }

    /// Members of each cluster in ascending order.
    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    /// Cluster of vector `index`.
    pub fn cluster_of(&self, index: usize) -> Option<usize> {
        self.assignments.get(index).copied().flatten()
    }

    /// Vectors that belong to no cluster.
    pub fn rejected(&self) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_none())
            .map(|(index, _)| index)
            .collect()
    }
}
