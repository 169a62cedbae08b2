//! Error types for Malheur.
//!
//! All fallible operations return [`MalheurError`] through the crate-wide
//! [`Result`] alias. The variants follow the three failure classes of the
//! analysis pipeline (configuration, data and resources) plus the usual
//! I/O and serialization plumbing.
//!
//! # Examples
//!
//! ```
//! use malheur::error::{MalheurError, Result};
//!
//! fn check_threshold(threshold: f64) -> Result<()> {
//!     if threshold < 0.0 {
//!         return Err(MalheurError::config("threshold must not be negative"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_threshold(-1.0).unwrap_err().is_config());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Malheur operations.
#[derive(Error, Debug)]
pub enum MalheurError {
    /// Invalid threshold, unknown kernel or linkage, missing output destination.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty or unreadable input, malformed or inconsistent data.
    #[error("Data error: {0}")]
    Data(String),

    /// An allocation that could not be satisfied.
    #[error("Resource error: could not allocate {what} ({bytes} bytes)")]
    Resource {
        /// What was being allocated.
        what: String,
        /// Attempted allocation size in bytes.
        bytes: u128,
    },

    /// I/O errors (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias for operations that may fail with MalheurError.
pub type Result<T> = std::result::Result<T, MalheurError>;

impl MalheurError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MalheurError::Config(msg.into())
    }

    /// Create a new data error.
    pub fn data<S: Into<String>>(msg: S) -> Self {
        MalheurError::Data(msg.into())
    }

    /// Create a new resource error for an allocation of `bytes` bytes.
    pub fn resource<S: Into<String>>(what: S, bytes: u128) -> Self {
        MalheurError::Resource {
            what: what.into(),
            bytes,
        }
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        MalheurError::Serialization(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        MalheurError::InvalidOperation(msg.into())
    }

    /// Whether this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, MalheurError::Config(_))
    }

    /// Whether this is a data error.
    pub fn is_data(&self) -> bool {
        matches!(self, MalheurError::Data(_))
    }

    /// Whether this is a resource error.
    pub fn is_resource(&self) -> bool {
        matches!(self, MalheurError::Resource { .. })
    }
}

impl From<bincode::Error> for MalheurError {
    fn from(err: bincode::Error) -> Self {
        MalheurError::serialization(err.to_string())
    }
}
