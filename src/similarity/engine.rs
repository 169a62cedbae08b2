//! Pairwise and collection-wide kernel evaluation.

use log::debug;
use rayon::prelude::*;

use crate::error::Result;
use crate::feature::collection::FeatureVectorCollection;
use crate::feature::vector::FeatureVector;
use crate::similarity::kernel::Kernel;
use crate::similarity::matrix::SimilarityMatrix;

/// Minimum number of matrix rows before rows are computed in parallel.
const PARALLEL_ROW_CUTOFF: usize = 16;

/// Minimum number of targets before a one-to-many scan runs in parallel.
const PARALLEL_SCAN_CUTOFF: usize = 256;

/// Computes kernel values between vectors and whole collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimilarityEngine {
    kernel: Kernel,
    parallel: bool,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(Kernel::default())
    }
}

impl SimilarityEngine {
    /// Create an engine for the given kernel. Parallel evaluation is enabled.
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            parallel: true,
        }
    }

    /// Enable or disable multi-threaded evaluation.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// The kernel function in use.
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Similarity between two vectors.
    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        self.kernel.evaluate(a, b)
    }

    /// Similarities between `query` and each target, in target order.
    pub fn similarities(&self, query: &FeatureVector, targets: &[&FeatureVector]) -> Vec<f64> {
        if self.parallel && targets.len() >= PARALLEL_SCAN_CUTOFF {
            targets
                .par_iter()
                .map(|target| self.similarity(query, target))
                .collect()
        } else {
            targets
                .iter()
                .map(|target| self.similarity(query, target))
                .collect()
        }
    }

    /// Similarity matrix with rows from `a` and columns from `b`.
    ///
    /// When both arguments are the same collection only the upper triangle
    /// is evaluated and then mirrored.
    pub fn matrix(
        &self,
        a: &FeatureVectorCollection,
        b: &FeatureVectorCollection,
    ) -> Result<SimilarityMatrix> {
        if std::ptr::eq(a, b) {
            return self.self_matrix(a);
        }

        let mut matrix = SimilarityMatrix::zeros(a.len(), b.len())?;
        debug!(
            "Computing {}x{} {} kernel matrix",
            a.len(),
            b.len(),
            self.kernel.name()
        );

        let cols = b.len();
        if cols == 0 {
            return Ok(matrix);
        }

        let fill_row = |(i, row): (usize, &mut [f64])| {
            let left = &a.vectors()[i];
            for (value, right) in row.iter_mut().zip(b.vectors()) {
                *value = self.similarity(left, right);
            }
        };

        if self.parallel && a.len() >= PARALLEL_ROW_CUTOFF {
            matrix
                .as_mut_slice()
                .par_chunks_mut(cols)
                .enumerate()
                .for_each(fill_row);
        } else {
            matrix
                .as_mut_slice()
                .chunks_mut(cols)
                .enumerate()
                .for_each(fill_row);
        }

        Ok(matrix)
    }

    /// Symmetric similarity matrix of a collection with itself.
    pub fn self_matrix(&self, collection: &FeatureVectorCollection) -> Result<SimilarityMatrix> {
        let n = collection.len();
        let mut matrix = SimilarityMatrix::zeros(n, n)?;
        debug!("Computing {n}x{n} {} kernel matrix", self.kernel.name());
        if n == 0 {
            return Ok(matrix);
        }

        let vectors = collection.vectors();
        let fill_upper = |(i, row): (usize, &mut [f64])| {
            for j in i..n {
                row[j] = self.similarity(&vectors[i], &vectors[j]);
            }
        };

        if self.parallel && n >= PARALLEL_ROW_CUTOFF {
            matrix
                .as_mut_slice()
                .par_chunks_mut(n)
                .enumerate()
                .for_each(fill_upper);
        } else {
            matrix
                .as_mut_slice()
                .chunks_mut(n)
                .enumerate()
                .for_each(fill_upper);
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let value = matrix.get(i, j);
                matrix.set(j, i, value);
            }
        }

        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(vectors: &[&[(u32, f64)]]) -> FeatureVectorCollection {
        let mut collection = FeatureVectorCollection::new();
        for (i, entries) in vectors.iter().enumerate() {
            collection.push(
                FeatureVector::from_entries(entries.to_vec()).unwrap(),
                "",
                format!("r{i}"),
            );
        }
        collection
    }

    #[test]
    fn test_self_matrix_is_symmetric() {
        let data = collection(&[&[(0, 1.0), (1, 1.0)], &[(0, 1.0)], &[(2, 1.0)], &[]]);
        let engine = SimilarityEngine::new(Kernel::Linear);
        let matrix = engine.self_matrix(&data).unwrap();

        assert!(matrix.is_symmetric());
        assert_eq!(matrix.diagonal(), vec![2.0, 1.0, 1.0, 0.0]);
        assert_eq!(matrix.get(0, 1), 1.0);
        assert_eq!(matrix.get(0, 2), 0.0);
        assert_eq!(matrix.get(3, 0), 0.0);
    }

    #[test]
    fn test_cosine_diagonal_is_exactly_one() {
        let data = collection(&[&[(0, 1.0), (1, 1.0)], &[(0, 1.0), (1, 1.0), (2, 1.0)], &[(4, 3.0), (9, 0.1)]]);
        let matrix = SimilarityEngine::new(Kernel::Cosine).self_matrix(&data).unwrap();
        assert_eq!(matrix.diagonal(), vec![1.0, 1.0, 1.0]);
        assert!(matrix.get(0, 1) < 1.0);
    }

    #[test]
    fn test_cross_matrix_matches_pairwise() {
        let a = collection(&[&[(0, 1.0), (1, 2.0)], &[(1, 1.0)]]);
        let b = collection(&[&[(1, 1.0)], &[(0, 3.0)], &[(5, 1.0)]]);
        let engine = SimilarityEngine::new(Kernel::Cosine);
        let matrix = engine.matrix(&a, &b).unwrap();

        assert_eq!((matrix.rows(), matrix.cols()), (2, 3));
        for i in 0..2 {
            for j in 0..3 {
                let expected = engine.similarity(a.vector(i).unwrap(), b.vector(j).unwrap());
                assert_eq!(matrix.get(i, j), expected);
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let vectors: Vec<Vec<(u32, f64)>> = (0..40u32)
            .map(|i| (0..(i % 5 + 1)).map(|j| ((i * 7 + j * 3) % 13, 1.0 + j as f64)).collect())
            .collect();
        let refs: Vec<&[(u32, f64)]> = vectors.iter().map(Vec::as_slice).collect();
        let data = collection(&refs);

        let parallel = SimilarityEngine::new(Kernel::Cosine).self_matrix(&data).unwrap();
        let sequential = SimilarityEngine::new(Kernel::Cosine)
            .with_parallel(false)
            .self_matrix(&data)
            .unwrap();
        assert_eq!(parallel, sequential);

        let query = data.vector(3).unwrap();
        let targets: Vec<&FeatureVector> = data.vectors().iter().collect();
        let scanned = SimilarityEngine::new(Kernel::Cosine).similarities(query, &targets);
        assert_eq!(scanned.as_slice(), parallel.row(3));
    }

    #[test]
    fn test_empty_collections() {
        let empty = FeatureVectorCollection::new();
        let engine = SimilarityEngine::default();
        let matrix = engine.self_matrix(&empty).unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (0, 0));

        let other = collection(&[&[(1, 1.0)]]);
        let matrix = engine.matrix(&other, &empty).unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (1, 0));
    }
}
