//! Loading raw reports from disk.
//!
//! Three input kinds are recognized:
//!
//! - a directory, where every regular file is one report,
//! - a `.jsonl` file holding one JSON report per line,
//! - a serialized feature vector collection (`.mhfv`), which skips
//!   vectorization entirely.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;

use crate::config::FeatureConfig;
use crate::error::{MalheurError, Result};
use crate::feature::collection::{FeatureVectorCollection, RawReport, Token};
use crate::feature::hasher::FeatureHasher;
use crate::feature::io;

/// Extension of serialized collections.
pub const COLLECTION_EXTENSION: &str = "mhfv";

/// Split `text` into words and join consecutive words into n-gram tokens.
///
/// A report with fewer than `ngram_length` words yields a single token made
/// of all its words; a report without words yields no tokens.
pub fn tokenize(text: &str, delimiters: &str, ngram_length: usize) -> Vec<Token> {
    let words: Vec<&str> = text
        .split(|c: char| delimiters.contains(c))
        .filter(|word| !word.is_empty())
        .collect();

    if words.is_empty() {
        return Vec::new();
    }
    let n = ngram_length.max(1);
    if words.len() < n {
        return vec![Token::Plain(words.join(" "))];
    }
    words.windows(n).map(|gram| Token::Plain(gram.join(" "))).collect()
}

/// Read every regular file of `dir` as one report, in file name order.
pub fn load_directory<P: AsRef<Path>>(dir: P, config: &FeatureConfig) -> Result<Vec<RawReport>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir)
        .map_err(|e| MalheurError::data(format!("Cannot read directory {}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} report files in {}", paths.len(), dir.display());

    paths
        .par_iter()
        .map(|path| read_report(path, config))
        .collect()
}

fn read_report(path: &Path, config: &FeatureConfig) -> Result<RawReport> {
    let bytes = fs::read(path)
        .map_err(|e| MalheurError::data(format!("Cannot read report {}: {e}", path.display())))?;
    let text = String::from_utf8_lossy(&bytes);

    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let label = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(RawReport {
        source,
        label,
        tokens: tokenize(&text, &config.delimiters, config.ngram_length),
    })
}

/// Read one JSON report per line; blank lines are skipped.
pub fn load_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<RawReport>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| MalheurError::data(format!("Cannot read {}: {e}", path.display())))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                MalheurError::data(format!("{}:{}: invalid report: {e}", path.display(), number + 1))
            })
        })
        .collect()
}

/// Load raw reports from a directory or a `.jsonl` file.
pub fn load_reports<P: AsRef<Path>>(path: P, config: &FeatureConfig) -> Result<Vec<RawReport>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MalheurError::data(format!("Input {} does not exist", path.display())));
    }

    let reports = if path.is_dir() {
        load_directory(path, config)?
    } else if has_extension(path, "jsonl") {
        load_jsonl(path)?
    } else {
        return Err(MalheurError::data(format!(
            "Unsupported input {}: expected a directory, .jsonl or .{COLLECTION_EXTENSION} file",
            path.display()
        )));
    };

    info!("Loaded {} reports from {}", reports.len(), path.display());
    Ok(reports)
}

/// Load the input of a task as a feature vector collection.
pub fn load_input<P: AsRef<Path>>(
    path: P,
    hasher: &FeatureHasher,
    config: &FeatureConfig,
) -> Result<FeatureVectorCollection> {
    let path = path.as_ref();
    if path.is_file() && has_extension(path, COLLECTION_EXTENSION) {
        let collection = io::load_collection(path)?;
        collection.validate(hasher.capacity())?;
        info!("Loaded {} feature vectors from {}", collection.len(), path.display());
        return Ok(collection);
    }

    let reports = load_reports(path, config)?;
    FeatureVectorCollection::from_reports(&reports, hasher, config)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
}
