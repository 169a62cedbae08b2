//! Run configuration.
//!
//! A configuration file is a JSON document with one section per stage.
//! Every field is optional; missing fields take the defaults below.
//!
//! ```
//! use malheur::config::MalheurConfig;
//!
//! let config: MalheurConfig = serde_json::from_str(
//!     r#"{ "prototypes": { "threshold": 0.5 }, "cluster": { "linkage": "Average" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.prototypes.threshold, 0.5);
//! assert_eq!(config.cluster.linkage.name(), "average");
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::cluster::engine::ClusterMode;
use crate::cluster::linkage::Linkage;
use crate::error::{MalheurError, Result};
use crate::feature::hasher::{DEFAULT_CAPACITY, validate_capacity};
use crate::feature::vector::{Embedding, Normalization};
use crate::similarity::kernel::Kernel;

/// Complete configuration of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MalheurConfig {
    pub features: FeatureConfig,
    pub kernel: KernelConfig,
    pub prototypes: PrototypeConfig,
    pub cluster: ClusterConfig,
    /// Worker threads; defaults to the number of CPUs.
    pub threads: Option<usize>,
}

impl MalheurConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MalheurError::config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
            .map_err(|e| MalheurError::config(format!("{}: {e}", path.display())))
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| MalheurError::config(format!("Invalid configuration: {e}")))
    }

    /// Check every setting before any computation starts.
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.prototypes.validate()?;
        self.cluster.validate()?;
        if self.threads == Some(0) {
            return Err(MalheurError::config("Thread count must be at least 1"));
        }
        Ok(())
    }

    /// Number of worker threads to run with.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

/// Report vectorization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Size of the feature index space.
    pub table_capacity: usize,
    /// Keep a token lookup table for inspecting and exporting features.
    pub lookup_table: bool,
    #[serde(deserialize_with = "choice")]
    pub embedding: Embedding,
    #[serde(deserialize_with = "choice")]
    pub normalization: Normalization,
    /// Number of consecutive words forming one token during ingestion.
    pub ngram_length: usize,
    /// Characters separating words during ingestion.
    pub delimiters: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            table_capacity: DEFAULT_CAPACITY,
            lookup_table: false,
            embedding: Embedding::Count,
            normalization: Normalization::None,
            ngram_length: 2,
            delimiters: " %\t\n\r".to_string(),
        }
    }
}

impl FeatureConfig {
    fn validate(&self) -> Result<()> {
        validate_capacity(self.table_capacity)?;
        if self.ngram_length == 0 {
            return Err(MalheurError::config("N-gram length must be at least 1"));
        }
        if self.delimiters.is_empty() {
            return Err(MalheurError::config("Delimiter set must not be empty"));
        }
        Ok(())
    }
}

/// Settings of the kernel matrix task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    #[serde(deserialize_with = "choice")]
    pub function: Kernel,
    pub parallel: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            function: Kernel::Linear,
            parallel: true,
        }
    }
}

/// Settings of prototype extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrototypeConfig {
    /// Minimum similarity between a report and its prototype.
    pub threshold: f64,
    #[serde(deserialize_with = "choice")]
    pub kernel: Kernel,
}

impl Default for PrototypeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.65,
            kernel: Kernel::Cosine,
        }
    }
}

impl PrototypeConfig {
    fn validate(&self) -> Result<()> {
        self.kernel.validate_threshold(self.threshold)
    }
}

/// Settings of hierarchical clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    #[serde(deserialize_with = "choice")]
    pub linkage: Linkage,
    #[serde(deserialize_with = "choice")]
    pub kernel: Kernel,
    /// `cut` or `dendrogram`.
    pub mode: String,
    pub cut_threshold: f64,
    /// Stop merging below this similarity.
    pub min_similarity: Option<f64>,
    /// Smaller clusters are reported as rejected.
    pub min_cluster_size: usize,
    /// Cluster prototypes, then hand each report its prototype's cluster.
    pub use_prototypes: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            linkage: Linkage::Complete,
            kernel: Kernel::Cosine,
            mode: "cut".to_string(),
            cut_threshold: 0.95,
            min_similarity: None,
            min_cluster_size: 1,
            use_prototypes: false,
        }
    }
}

impl ClusterConfig {
    /// Resolve the output mode.
    pub fn cluster_mode(&self) -> Result<ClusterMode> {
        ClusterMode::parse_str(&self.mode, self.cut_threshold)
    }

    fn validate(&self) -> Result<()> {
        if let ClusterMode::Cut { threshold } = self.cluster_mode()? {
            if !threshold.is_finite() {
                return Err(MalheurError::config(format!(
                    "Cut threshold must be finite, got {threshold}"
                )));
            }
        }
        if let Some(min) = self.min_similarity {
            if !min.is_finite() {
                return Err(MalheurError::config(format!(
                    "Minimum similarity must be finite, got {min}"
                )));
            }
        }
        if self.min_cluster_size == 0 {
            return Err(MalheurError::config("Minimum cluster size must be at least 1"));
        }
        Ok(())
    }
}

/// Deserialize a choice through its case-insensitive parser.
fn choice<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = MalheurError>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MalheurConfig::default();
        config.validate().unwrap();
        assert_eq!(config.features.table_capacity, 1 << 20);
        assert_eq!(config.prototypes.kernel, Kernel::Cosine);
        assert_eq!(config.cluster.linkage, Linkage::Complete);
        assert_eq!(
            config.cluster.cluster_mode().unwrap(),
            ClusterMode::Cut { threshold: 0.95 }
        );
        assert!(config.thread_count() >= 1);
    }

    #[test]
    fn test_partial_json_with_mixed_case_choices() {
        let config = MalheurConfig::from_json(
            r#"{
                "features": { "normalization": "L2", "embedding": "Binary" },
                "kernel": { "function": "COSINE" },
                "cluster": { "mode": "Dendrogram", "min_cluster_size": 3 },
                "threads": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.features.normalization, Normalization::L2);
        assert_eq!(config.features.embedding, Embedding::Binary);
        assert_eq!(config.features.ngram_length, 2);
        assert_eq!(config.kernel.function, Kernel::Cosine);
        assert_eq!(config.cluster.cluster_mode().unwrap(), ClusterMode::Dendrogram);
        assert_eq!(config.thread_count(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_choice_is_a_config_error() {
        let error = MalheurConfig::from_json(r#"{ "cluster": { "linkage": "ward" } }"#).unwrap_err();
        assert!(error.is_config());
        assert!(error.to_string().contains("ward"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MalheurConfig::default();
        config.prototypes.threshold = 1.5;
        assert!(config.validate().unwrap_err().is_config());

        let mut config = MalheurConfig::default();
        config.features.table_capacity = 0;
        assert!(config.validate().unwrap_err().is_config());

        let mut config = MalheurConfig::default();
        config.cluster.mode = "flat".to_string();
        assert!(config.validate().unwrap_err().is_config());

        let mut config = MalheurConfig::default();
        config.cluster.min_cluster_size = 0;
        assert!(config.validate().unwrap_err().is_config());

        let mut config = MalheurConfig::default();
        config.threads = Some(0);
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "prototypes": {{ "threshold": 0.4 }} }}"#).unwrap();
        let config = MalheurConfig::from_file(file.path()).unwrap();
        assert_eq!(config.prototypes.threshold, 0.4);

        let missing = MalheurConfig::from_file("/nonexistent/malheur.json").unwrap_err();
        assert!(missing.is_config());
    }
}
