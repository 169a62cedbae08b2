//! Linkage rules for agglomerative clustering.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};

/// Rule deriving the similarity between clusters from member similarities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Most similar member pair.
    Single,
    /// Least similar member pair.
    #[default]
    Complete,
    /// Mean over all member pairs.
    Average,
}

impl Linkage {
    /// Similarity between `a ∪ b` and another cluster `k`, given the
    /// similarities of `a` and `b` to `k` and the sizes of `a` and `b`.
    pub fn update(&self, sim_a: f64, sim_b: f64, size_a: usize, size_b: usize) -> f64 {
        match self {
            Linkage::Single => sim_a.max(sim_b),
            Linkage::Complete => sim_a.min(sim_b),
            Linkage::Average => {
                let (wa, wb) = (size_a as f64, size_b as f64);
                (wa * sim_a + wb * sim_b) / (wa + wb)
            }
        }
    }

    /// Get the name of this linkage.
    pub fn name(&self) -> &'static str {
        match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        }
    }

    /// Parse a linkage from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Linkage::Single),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            _ => Err(MalheurError::config(format!("Unknown linkage: {s}"))),
        }
    }
}

impl FromStr for Linkage {
    type Err = MalheurError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_rules() {
        assert_eq!(Linkage::Single.update(0.2, 0.8, 1, 3), 0.8);
        assert_eq!(Linkage::Complete.update(0.2, 0.8, 1, 3), 0.2);
        assert_eq!(Linkage::Average.update(0.2, 0.8, 1, 3), (0.2 + 3.0 * 0.8) / 4.0);
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(Linkage::parse_str("Average").unwrap(), Linkage::Average);
        assert!(Linkage::parse_str("ward").unwrap_err().is_config());
    }
}
