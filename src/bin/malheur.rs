//! Malheur CLI binary.

use std::io::Write;
use std::process;

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;

use malheur::cli::{MalheurArgs, execute_command};

fn main() {
    let args = MalheurArgs::parse();

    Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(args: &MalheurArgs) -> anyhow::Result<()> {
    execute_command(args)
        .with_context(|| format!("{} task on {} failed", args.task, args.input.display()))
}
