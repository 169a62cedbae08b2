//! Command line argument parsing for the Malheur CLI using clap.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Malheur - automatic analysis of malware behavior reports
#[derive(Parser, Debug, Clone)]
#[command(name = "malheur")]
#[command(about = "Automatic analysis of malware behavior reports")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct MalheurArgs {
    /// Analysis task: kernel, prototype or cluster
    #[arg(value_name = "TASK")]
    pub task: String,

    /// Report directory, .jsonl report file or .mhfv feature vector file
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Configuration file (JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "MALHEUR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write analysis results to this file
    #[arg(short = 'r', long = "results", value_name = "FILE")]
    pub results: Option<PathBuf>,

    /// Save the prototype feature vectors to this file
    #[arg(short = 's', short_alias = 'l', long = "save-prototypes", value_name = "FILE")]
    pub save_prototypes: Option<PathBuf>,

    /// Enable the feature lookup table
    #[arg(short = 't', long = "lookup-table")]
    pub lookup_table: bool,

    /// Number of worker threads (defaults to the number of CPUs)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Result format
    #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl MalheurArgs {
    /// Log level for the number of `-v` flags.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }
}

/// Output format for analysis results.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Plain text with a comment header
    Text,
    /// JSON document
    Json,
}
