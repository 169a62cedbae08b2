//! Feature extraction: token hashing, sparse vectors and vector collections.
//!
//! # Module Structure
//!
//! - `hasher`: token → index mapping with an optional lookup table
//! - `vector`: sparse vectors, embedding and normalization
//! - `collection`: ordered vectors with label and source metadata
//! - `io`: binary persistence of collections

pub mod collection;
pub mod hasher;
pub mod io;
pub mod vector;

pub use self::collection::{FeatureVectorCollection, RawReport, Token};
pub use self::hasher::{FeatureHasher, FeatureTable, TableStats};
pub use self::vector::{Embedding, FeatureVector, FeatureVectorBuilder, Normalization};
