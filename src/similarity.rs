//! Similarity (kernel) computation between feature vectors.
//!
//! # Module Structure
//!
//! - `kernel`: kernel functions over sparse vectors
//! - `matrix`: dense similarity matrices
//! - `engine`: pairwise and collection-wide evaluation

pub mod engine;
pub mod kernel;
pub mod matrix;

pub use self::engine::SimilarityEngine;
pub use self::kernel::Kernel;
pub use self::matrix::SimilarityMatrix;
