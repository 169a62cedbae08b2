//! # Malheur
//!
//! Automatic analysis of malware behavior reports.
//!
//! ## Features
//!
//! - Feature hashing of behavioral tokens into sparse vectors
//! - Linear and cosine kernel matrices
//! - Greedy prototype extraction
//! - Hierarchical agglomerative clustering with single, complete and
//!   average linkage

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod feature;
pub mod ingest;
pub mod prototype;
pub mod similarity;
pub mod task;

pub mod prelude {
    pub use crate::cluster::{ClusterEngine, ClusterMode, ClusterResult, Dendrogram, Linkage, Partition};
    pub use crate::config::MalheurConfig;
    pub use crate::error::{MalheurError, Result};
    pub use crate::feature::{FeatureHasher, FeatureVector, FeatureVectorCollection, RawReport};
    pub use crate::prototype::{PrototypeExtractor, PrototypeSet};
    pub use crate::similarity::{Kernel, SimilarityEngine, SimilarityMatrix};
    pub use crate::task::{AnalysisOutput, AnalysisRequest, TaskKind, TaskRunner};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
