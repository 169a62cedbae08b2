//! Analysis tasks over a feature vector collection.
//!
//! A run is described by an [`AnalysisRequest`], resolved once from the
//! configuration, and executed by a [`TaskRunner`] on its own thread pool.

use std::fmt;

use log::{debug, info};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::cluster::engine::{ClusterEngine, ClusterMode, ClusterResult};
use crate::cluster::linkage::Linkage;
use crate::config::MalheurConfig;
use crate::error::{MalheurError, Result};
use crate::feature::collection::FeatureVectorCollection;
use crate::prototype::{PrototypeExtractor, PrototypeSet};
use crate::similarity::engine::SimilarityEngine;
use crate::similarity::kernel::Kernel;
use crate::similarity::matrix::SimilarityMatrix;

/// The analysis to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Pairwise similarity matrix.
    Kernel,
    /// Prototype extraction.
    Prototype,
    /// Hierarchical clustering.
    Cluster,
}

impl TaskKind {
    /// Get the name of this task.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Kernel => "kernel",
            TaskKind::Prototype => "prototype",
            TaskKind::Cluster => "cluster",
        }
    }

    /// Parse a task name, ignoring case.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "kernel" => Ok(TaskKind::Kernel),
            "prototype" => Ok(TaskKind::Prototype),
            "cluster" => Ok(TaskKind::Cluster),
            _ => Err(MalheurError::config(format!("Unknown analysis task: {s}"))),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelRequest {
    pub kernel: Kernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrototypeRequest {
    pub kernel: Kernel,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub linkage: Linkage,
    pub mode: ClusterMode,
    pub min_similarity: Option<f64>,
    pub min_cluster_size: usize,
    /// Kernel of the matrix that is clustered.
    pub kernel: Kernel,
    /// Cluster prototypes instead of every report.
    pub prototypes: Option<PrototypeRequest>,
}

/// A fully resolved task with only the settings it needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "lowercase")]
pub enum AnalysisRequest {
    Kernel(KernelRequest),
    Prototype(PrototypeRequest),
    Cluster(ClusterRequest),
}

impl AnalysisRequest {
    /// Validate `config` and pick the settings relevant to `task`.
    pub fn from_config(task: TaskKind, config: &MalheurConfig) -> Result<Self> {
        config.validate()?;

        let prototypes = PrototypeRequest {
            kernel: config.prototypes.kernel,
            threshold: config.prototypes.threshold,
        };
        let request = match task {
            TaskKind::Kernel => AnalysisRequest::Kernel(KernelRequest {
                kernel: config.kernel.function,
            }),
            TaskKind::Prototype => AnalysisRequest::Prototype(prototypes),
            TaskKind::Cluster => AnalysisRequest::Cluster(ClusterRequest {
                linkage: config.cluster.linkage,
                mode: config.cluster.cluster_mode()?,
                min_similarity: config.cluster.min_similarity,
                min_cluster_size: config.cluster.min_cluster_size,
                kernel: config.cluster.kernel,
                prototypes: config.cluster.use_prototypes.then_some(prototypes),
            }),
        };
        request.validate()?;
        Ok(request)
    }

    /// The task this request runs.
    pub fn kind(&self) -> TaskKind {
        match self {
            AnalysisRequest::Kernel(_) => TaskKind::Kernel,
            AnalysisRequest::Prototype(_) => TaskKind::Prototype,
            AnalysisRequest::Cluster(_) => TaskKind::Cluster,
        }
    }

    /// Check settings that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        match self {
            AnalysisRequest::Kernel(_) => Ok(()),
            AnalysisRequest::Prototype(request) => request.kernel.validate_threshold(request.threshold),
            AnalysisRequest::Cluster(request) => {
                if let Some(prototypes) = &request.prototypes {
                    prototypes.kernel.validate_threshold(prototypes.threshold)?;
                }
                if let ClusterMode::Cut { threshold } = request.mode {
                    if !threshold.is_finite() {
                        return Err(MalheurError::config(format!(
                            "Cut threshold must be finite, got {threshold}"
                        )));
                    }
                }
                if request.min_cluster_size == 0 {
                    return Err(MalheurError::config("Minimum cluster size must be at least 1"));
                }
                ClusterEngine::new(request.linkage).with_min_similarity(request.min_similarity)?;
                Ok(())
            }
        }
    }
}

/// Clustering outcome of the cluster task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    /// Merge tree over the clustered vectors (the prototypes, when used) and
    /// the flat partition over every report.
    pub result: ClusterResult,
    pub prototypes: Option<PrototypeSet>,
}

/// Numeric result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "result", rename_all = "lowercase")]
pub enum AnalysisOutput {
    Kernel(SimilarityMatrix),
    Prototype(PrototypeSet),
    Cluster(ClusterOutput),
}

/// Runs requests on a dedicated thread pool.
pub struct TaskRunner {
    pool: ThreadPool,
    parallel: bool,
}

impl TaskRunner {
    /// Create a runner with `threads` workers.
    pub fn new(threads: usize, parallel: bool) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("malheur-{i}"))
            .build()
            .map_err(|e| MalheurError::invalid_operation(format!("Failed to create thread pool: {e}")))?;
        Ok(Self { pool, parallel })
    }

    /// Create a runner sized and configured from `config`.
    pub fn from_config(config: &MalheurConfig) -> Result<Self> {
        Self::new(config.thread_count(), config.kernel.parallel)
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `request` over `collection`.
    pub fn run(
        &self,
        request: &AnalysisRequest,
        collection: &FeatureVectorCollection,
    ) -> Result<AnalysisOutput> {
        request.validate()?;
        debug!(
            "Running {} task on {} threads",
            request.kind(),
            self.threads()
        );
        self.pool.install(|| execute(request, collection, self.parallel))
    }
}

/// Run `request` over `collection` on the global thread pool.
pub fn run(request: &AnalysisRequest, collection: &FeatureVectorCollection) -> Result<AnalysisOutput> {
    request.validate()?;
    execute(request, collection, true)
}

fn execute(
    request: &AnalysisRequest,
    collection: &FeatureVectorCollection,
    parallel: bool,
) -> Result<AnalysisOutput> {
    match request {
        AnalysisRequest::Kernel(request) => {
            require_data(collection, TaskKind::Kernel)?;
            let engine = SimilarityEngine::new(request.kernel).with_parallel(parallel);
            let matrix = engine.self_matrix(collection)?;
            info!(
                "Computed {0}x{0} {1} kernel matrix",
                matrix.rows(),
                request.kernel.name()
            );
            Ok(AnalysisOutput::Kernel(matrix))
        }
        AnalysisRequest::Prototype(request) => {
            let set = extract(request, collection, parallel)?;
            Ok(AnalysisOutput::Prototype(set))
        }
        AnalysisRequest::Cluster(request) => {
            require_data(collection, TaskKind::Cluster)?;
            Ok(AnalysisOutput::Cluster(cluster(request, collection, parallel)?))
        }
    }
}

fn extract(
    request: &PrototypeRequest,
    collection: &FeatureVectorCollection,
    parallel: bool,
) -> Result<PrototypeSet> {
    let engine = SimilarityEngine::new(request.kernel).with_parallel(parallel);
    PrototypeExtractor::new(engine, request.threshold)?.extract(collection)
}

fn cluster(
    request: &ClusterRequest,
    collection: &FeatureVectorCollection,
    parallel: bool,
) -> Result<ClusterOutput> {
    let engine = SimilarityEngine::new(request.kernel).with_parallel(parallel);
    let clusterer = ClusterEngine::new(request.linkage)
        .with_min_similarity(request.min_similarity)?
        .with_parallel(parallel);

    let Some(prototype_request) = &request.prototypes else {
        let matrix = engine.self_matrix(collection)?;
        let result = clusterer.cluster(&matrix, request.mode, request.min_cluster_size)?;
        return Ok(ClusterOutput {
            result,
            prototypes: None,
        });
    };

    let prototypes = extract(prototype_request, collection, parallel)?;
    let reduced = prototypes.to_collection(collection)?;
    let matrix = engine.self_matrix(&reduced)?;
    let mut result = clusterer.cluster(&matrix, request.mode, 1)?;
    result.partition = result
        .partition
        .map(|partition| partition.propagate(prototypes.assignments(), request.min_cluster_size));
    info!(
        "Propagated clusters of {} prototypes to {} reports",
        prototypes.len(),
        collection.len()
    );

    Ok(ClusterOutput {
        result,
        prototypes: Some(prototypes),
    })
}

fn require_data(collection: &FeatureVectorCollection, task: TaskKind) -> Result<()> {
    if collection.is_empty() {
        return Err(MalheurError::data(format!(
            "No reports to analyze for the {task} task"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::vector::FeatureVector;

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
    fn test_task_kind_is_case_insensitive() {
        assert_eq!(TaskKind::parse_str("KeRnEl").unwrap(), TaskKind::Kernel);
        assert_eq!(TaskKind::parse_str("Cluster").unwrap(), TaskKind::Cluster);
        assert!(TaskKind::parse_str("classify").unwrap_err().is_config());
    }

    #[test]
    fn test_from_config_picks_relevant_settings() {
        let mut config = MalheurConfig::default();
        config.cluster.use_prototypes = true;

        let request = AnalysisRequest::from_config(TaskKind::Cluster, &config).unwrap();
        let AnalysisRequest::Cluster(cluster) = request else {
            panic!("expected a cluster request");
        };
        assert_eq!(cluster.linkage, Linkage::Complete);
        assert_eq!(cluster.prototypes.unwrap().threshold, 0.65);

        config.prototypes.threshold = 2.0;
        let error = AnalysisRequest::from_config(TaskKind::Prototype, &config).unwrap_err();
        assert!(error.is_config());
    }

    #[test]
    fn test_empty_collection_handling() {
        let empty = FeatureVectorCollection::new();
        let config = MalheurConfig::default();

        for task in [TaskKind::Kernel, TaskKind::Cluster] {
            let request = AnalysisRequest::from_config(task, &config).unwrap();
            assert!(run(&request, &empty).unwrap_err().is_data());
        }

        let request = AnalysisRequest::from_config(TaskKind::Prototype, &config).unwrap();
        let AnalysisOutput::Prototype(set) = run(&request, &empty).unwrap() else {
            panic!("expected prototypes");
        };
        assert!(set.is_empty());
    }

    #[test]
    fn test_prototype_clustering_propagates_to_members() {
        // Two groups of near-duplicates plus one outlier.
        let data = collection(&[
            &[(0, 1.0), (1, 1.0)],
            &[(0, 1.0), (1, 1.0), (2, 0.1)],
            &[(5, 1.0), (6, 1.0)],
            &[(5, 1.0), (6, 1.1)],
            &[(9, 1.0)],
        ]);
        let request = AnalysisRequest::Cluster(ClusterRequest {
            linkage: Linkage::Average,
            mode: ClusterMode::Cut { threshold: 0.5 },
            min_similarity: None,
            min_cluster_size: 2,
            kernel: Kernel::Cosine,
            prototypes: Some(PrototypeRequest {
                kernel: Kernel::Cosine,
                threshold: 0.9,
            }),
        });

        let runner = TaskRunner::new(2, true).unwrap();
        let AnalysisOutput::Cluster(output) = runner.run(&request, &data).unwrap() else {
            panic!("expected clusters");
        };
        let prototypes = output.prototypes.unwrap();
        assert_eq!(prototypes.prototypes(), &[0, 2, 4]);
        assert_eq!(output.result.dendrogram.leaves(), 3);

        let partition = output.result.partition.unwrap();
        assert_eq!(
            partition.assignments(),
            &[Some(0), Some(0), Some(1), Some(1), None]
        );
    }

    #[test]
    fn test_runner_matches_global_pool() {
        let data = collection(&[&[(0, 1.0), (1, 1.0)], &[(0, 1.0)], &[(2, 1.0)]]);
        let request = AnalysisRequest::Kernel(KernelRequest {
            kernel: Kernel::Linear,
        });
        let runner = TaskRunner::new(1, false).unwrap();
        assert_eq!(runner.threads(), 1);
        assert_eq!(runner.run(&request, &data).unwrap(), run(&request, &data).unwrap());
    }
}
