//! Kernel functions for sparse feature vectors.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};
use crate::feature::vector::FeatureVector;

/// Kernel functions for vector similarity calculation.
///
/// All kernels are similarities: higher values mean more similar vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// Plain inner product.
    #[default]
    Linear,
    /// Inner product divided by both Euclidean norms.
    Cosine,
}

impl Kernel {
    /// Evaluate the kernel on two vectors.
    ///
    /// For the cosine kernel a zero vector on either side yields 0, and a
    /// vector compared with itself yields exactly 1.
    pub fn evaluate(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        match self {
            Kernel::Linear => a.dot(b),
            Kernel::Cosine => {
                let aa = a.squared_norm();
                let bb = b.squared_norm();
                if aa == 0.0 || bb == 0.0 {
                    0.0
                } else {
                    // sqrt(x * x) rounds back to x, so identical vectors give 1.
                    (a.dot(b) / (aa * bb).sqrt()).min(1.0)
                }
            }
        }
    }

    /// Largest value the kernel can attain on non-negative vectors.
    pub fn max_value(&self) -> f64 {
        match self {
            Kernel::Linear => f64::INFINITY,
            Kernel::Cosine => 1.0,
        }
    }

    /// Check that a similarity threshold is attainable with this kernel.
    pub fn validate_threshold(&self, threshold: f64) -> Result<()> {
        if threshold.is_nan() || threshold < 0.0 || threshold > self.max_value() {
            return Err(MalheurError::config(format!(
                "threshold {threshold} outside the range [0, {}] of the {} kernel",
                self.max_value(),
                self.name()
            )));
        }
        Ok(())
    }

    /// Get the name of this kernel.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Linear => "linear",
            Kernel::Cosine => "cosine",
        }
    }

    /// Parse a kernel from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" | "dot" => Ok(Kernel::Linear),
            "cosine" => Ok(Kernel::Cosine),
            _ => Err(MalheurError::config(format!("Unknown kernel function: {s}"))),
        }
    }
}

impl FromStr for Kernel {
    type Err = MalheurError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}
