//! Hierarchical agglomerative clustering.
//!
//! # Module Structure
//!
//! - `linkage`: inter-cluster similarity rules
//! - `dendrogram`: merge sequences and flat partitions
//! - `engine`: the merge loop

pub mod dendrogram;
pub mod engine;
pub mod linkage;

pub use self::dendrogram::{Dendrogram, Merge, Partition};
pub use self::engine::{ClusterEngine, ClusterMode, ClusterResult};
pub use self::linkage::Linkage;
