//! Result export for CLI commands.

use std::io::Write;

use chrono::Utc;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::cluster::engine::ClusterResult;
use crate::error::Result;
use crate::feature::collection::FeatureVectorCollection;
use crate::feature::hasher::TableStats;
use crate::prototype::PrototypeSet;
use crate::similarity::matrix::SimilarityMatrix;
use crate::task::{AnalysisOutput, ClusterOutput};

/// Context shared by every exported result.
#[derive(Debug, Clone, Copy)]
pub struct ExportContext<'a> {
    pub collection: &'a FeatureVectorCollection,
    pub table: Option<TableStats>,
}

/// JSON document written with `--format json`.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    generated: String,
    sources: &'a [String],
    labels: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<TableStats>,
    #[serde(flatten)]
    output: &'a AnalysisOutput,
}

/// Write `output` in the requested format.
pub fn write_output<W: Write>(
    out: &mut W,
    output: &AnalysisOutput,
    context: &ExportContext<'_>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => write_text(out, output, context),
        OutputFormat::Json => write_json(out, output, context),
    }
}

fn write_json<W: Write>(
    out: &mut W,
    output: &AnalysisOutput,
    context: &ExportContext<'_>,
) -> Result<()> {
    let report = JsonReport {
        version: crate::VERSION,
        generated: Utc::now().to_rfc3339(),
        sources: context.collection.sources(),
        labels: context.collection.labels(),
        table: context.table,
        output,
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

fn write_text<W: Write>(
    out: &mut W,
    output: &AnalysisOutput,
    context: &ExportContext<'_>,
) -> Result<()> {
    let task = match output {
        AnalysisOutput::Kernel(_) => "kernel",
        AnalysisOutput::Prototype(_) => "prototype",
        AnalysisOutput::Cluster(_) => "cluster",
    };
    writeln!(out, "# Malheur {} - {task} results", crate::VERSION)?;
    writeln!(out, "# Generated {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
    if let Some(stats) = context.table {
        writeln!(
            out,
            "# Feature table: {} of {} slots, {} collisions",
            stats.occupied, stats.capacity, stats.collisions
        )?;
    }

    match output {
        AnalysisOutput::Kernel(matrix) => write_kernel(out, matrix, context.collection),
        AnalysisOutput::Prototype(set) => write_prototypes(out, set, context.collection),
        AnalysisOutput::Cluster(clusters) => write_clusters(out, clusters, context.collection),
    }
}

fn write_kernel<W: Write>(
    out: &mut W,
    matrix: &SimilarityMatrix,
    collection: &FeatureVectorCollection,
) -> Result<()> {
    writeln!(out, "# {}", collection.sources().join(" "))?;
    for row in matrix.iter_rows() {
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}", values.join(" "))?;
    }
    Ok(())
}

fn write_prototypes<W: Write>(
    out: &mut W,
    set: &PrototypeSet,
    collection: &FeatureVectorCollection,
) -> Result<()> {
    writeln!(out, "# {} prototypes, threshold {}", set.len(), set.threshold())?;
    writeln!(out, "# <report> <prototype> <similarity>")?;
    for (index, source) in collection.sources().iter().enumerate() {
        let prototype = set
            .prototype_of(index)
            .and_then(|p| collection.source(p))
            .unwrap_or("-");
        let similarity = set
            .similarities()
            .get(index)
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        writeln!(out, "{source} {prototype} {similarity}")?;
    }
    Ok(())
}

fn write_clusters<W: Write>(
    out: &mut W,
    clusters: &ClusterOutput,
    collection: &FeatureVectorCollection,
) -> Result<()> {
    let ClusterResult {
        dendrogram,
        partition,
    } = &clusters.result;

    if let Some(prototypes) = &clusters.prototypes {
        writeln!(out, "# Clustered {} prototypes", prototypes.len())?;
    }

    match partition {
        Some(partition) => {
            writeln!(
                out,
                "# {} clusters, {} rejected",
                partition.num_clusters(),
                partition.rejected().len()
            )?;
            writeln!(out, "# <report> <cluster> <label>")?;
            for (index, (source, label)) in collection
                .sources()
                .iter()
                .zip(collection.labels())
                .enumerate()
            {
                match partition.cluster_of(index) {
                    Some(cluster) => writeln!(out, "{source} {cluster} {label}")?,
                    None => writeln!(out, "{source} rejected {label}")?,
                }
            }
        }
        None => {
            writeln!(out, "# {} leaves, {} merges", dendrogram.leaves(), dendrogram.merges().len())?;
            // Leaf ids index the clustered vectors, which are the prototypes when used.
            for leaf in 0..dendrogram.leaves() {
                let report = match &clusters.prototypes {
                    Some(prototypes) => prototypes.prototypes().get(leaf).copied(),
                    None => Some(leaf),
                };
                let source = report.and_then(|r| collection.source(r)).unwrap_or("-");
                writeln!(out, "# leaf {leaf} {source}")?;
            }
            writeln!(out, "# <left> <right> <similarity> <size>")?;
            for merge in dendrogram.merges() {
                writeln!(
                    out,
                    "{} {} {} {}",
                    merge.left, merge.right, merge.similarity, merge.size
                )?;
            }
        }
    }
    Ok(())
}
