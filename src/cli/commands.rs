//! Command implementation for the Malheur CLI.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use log::{info, warn};

use crate::cli::args::MalheurArgs;
use crate::cli::output::{ExportContext, write_output};
use crate::config::MalheurConfig;
use crate::error::{MalheurError, Result};
use crate::feature::hasher::FeatureHasher;
use crate::feature::io::save_collection;
use crate::ingest;
use crate::prototype::PrototypeSet;
use crate::task::{AnalysisOutput, AnalysisRequest, TaskKind, TaskRunner};

/// Run the task selected on the command line.
pub fn execute_command(args: &MalheurArgs) -> Result<()> {
    let task = TaskKind::parse_str(&args.task)?;
    check_destinations(task, args)?;

    let config = load_config(args)?;
    if prototype_file_ignored(task, args, &config) {
        warn!("Prototype file is ignored by the {task} task");
    }
    let request = AnalysisRequest::from_config(task, &config)?;
    info!("Running {task} task on {}", args.input.display());

    let hasher = if config.features.lookup_table {
        FeatureHasher::with_table(config.features.table_capacity)?
    } else {
        FeatureHasher::new(config.features.table_capacity)?
    };
    let collection = ingest::load_input(&args.input, &hasher, &config.features)?;
    let table = hasher.table().map(|table| table.stats());
    if let Some(stats) = table {
        info!(
            "Feature table holds {} of {} slots ({} collisions)",
            stats.occupied, stats.capacity, stats.collisions
        );
    }

    let runner = TaskRunner::from_config(&config)?;
    let output = runner.run(&request, &collection)?;

    if let Some(path) = &args.save_prototypes {
        if let Some(prototypes) = prototypes_of(&output) {
            save_collection(path, &prototypes.to_collection(&collection)?)?;
            info!("Saved {} prototypes to {}", prototypes.len(), path.display());
        }
    }

    let context = ExportContext {
        collection: &collection,
        table,
    };
    match &args.results {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_output(&mut writer, &output, &context, args.format)?;
            writer.flush()?;
            info!("Wrote {task} results to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            write_output(&mut writer, &output, &context, args.format)?;
        }
    }

    Ok(())
}

/// Check that the task has somewhere to put its results.
pub fn check_destinations(task: TaskKind, args: &MalheurArgs) -> Result<()> {
    match task {
        TaskKind::Kernel => {
            if args.results.is_none() {
                return Err(MalheurError::config(
                    "The kernel task requires a result file (-r)",
                ));
            }
        }
        TaskKind::Prototype => {
            if args.results.is_none() && args.save_prototypes.is_none() {
                return Err(MalheurError::config(
                    "The prototype task requires a result file (-r) or a prototype file (-s)",
                ));
            }
        }
        TaskKind::Cluster => {}
    }
    Ok(())
}

/// Whether `-s` was given to a task that produces no prototypes. Clustering
/// only extracts prototypes when `cluster.use_prototypes` is set.
pub fn prototype_file_ignored(task: TaskKind, args: &MalheurArgs, config: &MalheurConfig) -> bool {
    args.save_prototypes.is_some()
        && match task {
            TaskKind::Kernel => true,
            TaskKind::Prototype => false,
            TaskKind::Cluster => !config.cluster.use_prototypes,
        }
}

fn load_config(args: &MalheurArgs) -> Result<MalheurConfig> {
    let mut config = match &args.config {
        Some(path) => MalheurConfig::from_file(path)?,
        None => MalheurConfig::default(),
    };
    if args.lookup_table {
        config.features.lookup_table = true;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    config.validate()?;
    Ok(config)
}

fn prototypes_of(output: &AnalysisOutput) -> Option<&PrototypeSet> {
    match output {
        AnalysisOutput::Prototype(set) => Some(set),
        AnalysisOutput::Cluster(clusters) => clusters.prototypes.as_ref(),
        AnalysisOutput::Kernel(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(argv: &[&str]) -> MalheurArgs {
        MalheurArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_kernel_requires_result_file() {
        let error =
            check_destinations(TaskKind::Kernel, &args(&["malheur", "kernel", "in"])).unwrap_err();
        assert!(error.is_config());
        check_destinations(TaskKind::Kernel, &args(&["malheur", "-r", "out", "-s", "p", "kernel", "in"]))
            .unwrap();
    }

    #[test]
    fn test_prototype_requires_some_destination() {
        let bare = args(&["malheur", "prototype", "in"]);
        assert!(check_destinations(TaskKind::Prototype, &bare).unwrap_err().is_config());
        check_destinations(TaskKind::Prototype, &args(&["malheur", "-s", "p", "prototype", "in"]))
            .unwrap();
        check_destinations(TaskKind::Cluster, &args(&["malheur", "cluster", "in"])).unwrap();
    }

    #[test]
    fn test_prototype_file_ignored_without_prototypes() {
        let mut config = MalheurConfig::default();
        config.cluster.use_prototypes = false;
        let with_file = args(&["malheur", "-s", "p", "cluster", "in"]);
        assert!(prototype_file_ignored(TaskKind::Cluster, &with_file, &config));
        assert!(prototype_file_ignored(TaskKind::Kernel, &with_file, &config));
        assert!(!prototype_file_ignored(TaskKind::Prototype, &with_file, &config));
        assert!(!prototype_file_ignored(TaskKind::Cluster, &args(&["malheur", "cluster", "in"]), &config));

        config.cluster.use_prototypes = true;
        assert!(!prototype_file_ignored(TaskKind::Cluster, &with_file, &config));
    }

    #[test]
    fn test_unknown_task_fails_before_loading_input() {
        let error = execute_command(&args(&["malheur", "-r", "out", "classify", "/nonexistent"]))
            .unwrap_err();
        assert!(error.is_config());
    }
}
