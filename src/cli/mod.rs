//! Command line interface for Malheur.

pub mod args;
pub mod commands;
pub mod output;

pub use args::{MalheurArgs, OutputFormat};
pub use commands::execute_command;
